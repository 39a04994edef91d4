//! Corpus inspection: per-paper validation, on-disk statistics, and the
//! startup sweep of scratch directories left by a crashed run.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use arxline_arxiv::{PaperId, PaperMetadata};
use arxline_core::{Counter, Telemetry, fmt_num};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use walkdir::WalkDir;

use crate::layout::{PLACEHOLDER_FILE, PaperLayout, SCRATCH_DIR};

/// Validation result for one paper directory
#[derive(Debug, Default)]
pub struct PaperReport {
    pub folder: String,
    /// Collected version tags, ascending
    pub versions: Vec<String>,
    /// `.tex` count per version, same order as `versions`
    pub tex_counts: Vec<usize>,
    pub has_placeholder: bool,
    pub has_metadata: bool,
    /// Number of arXiv-identified references, when `references.json` parsed
    pub references: Option<usize>,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl PaperReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Inspect one paper directory (`<data_root>/<folder>`).
pub fn inspect_paper(paper_dir: &Path) -> PaperReport {
    let folder = paper_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut report = PaperReport {
        folder: folder.clone(),
        ..Default::default()
    };
    if !paper_dir.is_dir() {
        report.issues.push("Directory does not exist".to_string());
        return report;
    }

    let tex_root = paper_dir.join("tex");
    if tex_root.is_dir() {
        let layout = layout_for(paper_dir, &folder);
        report.versions = layout.collected_versions();
        report.has_placeholder = tex_root.join(&folder).join(PLACEHOLDER_FILE).exists();
        for tag in &report.versions {
            let dir = tex_root.join(format!("{folder}{tag}"));
            let count = count_tex(&dir);
            if count == 0 {
                report
                    .warnings
                    .push(format!("No .tex files in '{folder}{tag}/'"));
            }
            report.tex_counts.push(count);
        }
        if report.has_placeholder && !report.versions.is_empty() {
            report
                .issues
                .push("Placeholder present alongside collected versions".to_string());
        }
        if !report.has_placeholder && report.versions.is_empty() {
            report.issues.push("No versions or placeholder in 'tex/'".to_string());
        }
    } else {
        report.issues.push("Missing 'tex/' directory".to_string());
    }

    if paper_dir.join(SCRATCH_DIR).exists() {
        report.issues.push(format!("Leftover '{SCRATCH_DIR}/'"));
    }

    let metadata_path = paper_dir.join("metadata.json");
    match fs::read_to_string(&metadata_path) {
        Ok(text) => match serde_json::from_str::<PaperMetadata>(&text) {
            Ok(meta) => {
                report.has_metadata = true;
                if meta.title.is_empty() {
                    report.warnings.push("Empty title in metadata".to_string());
                }
                if meta.authors.is_empty() {
                    report.warnings.push("No authors in metadata".to_string());
                }
            }
            Err(_) => report.issues.push("Invalid 'metadata.json'".to_string()),
        },
        Err(_) => report.issues.push("Missing 'metadata.json'".to_string()),
    }

    match read_references(paper_dir) {
        Some(Ok(n)) => report.references = Some(n),
        Some(Err(())) => report.warnings.push("Invalid JSON in 'references.json'".to_string()),
        None => report.warnings.push("Missing 'references.json'".to_string()),
    }
    report
}

fn layout_for(paper_dir: &Path, folder: &str) -> PaperLayout {
    let root = paper_dir.parent().unwrap_or(Path::new(""));
    match folder.replacen('-', ".", 1).parse::<PaperId>() {
        Ok(id) => PaperLayout::new(root, &id),
        // Unparseable folder: fall back to a layout that matches nothing
        Err(_) => PaperLayout::new(root, &PaperId::from_parts(0, 1, 0)),
    }
}

fn count_tex(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|x| x.eq_ignore_ascii_case("tex"))
        })
        .count()
}

/// `None` if absent, `Some(Err)` if not a JSON object, else its key count
fn read_references(paper_dir: &Path) -> Option<Result<usize, ()>> {
    let text = fs::read_to_string(paper_dir.join("references.json")).ok()?;
    Some(
        serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&text)
            .map(|m| m.len())
            .map_err(|_| ()),
    )
}

/// Corpus-wide statistics recomputed from disk
#[derive(Debug, Default)]
pub struct CorpusStats {
    pub papers: usize,
    pub papers_with_source: usize,
    pub placeholders: usize,
    pub versions: usize,
    pub metadata_files: usize,
    pub references_files: usize,
    pub total_references: usize,
    pub papers_without_arxiv_refs: usize,
    pub valid: usize,
    pub with_warnings: usize,
    /// Issue text → occurrences
    pub issues: BTreeMap<String, usize>,
}

/// Scan every paper directory under `data_root`.
pub fn scan_corpus(data_root: &Path) -> io::Result<CorpusStats> {
    let mut stats = CorpusStats::default();
    let mut dirs: Vec<_> = fs::read_dir(data_root)?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.path())
        .collect();
    dirs.sort();

    for dir in dirs {
        let report = inspect_paper(&dir);
        stats.papers += 1;
        if !report.versions.is_empty() {
            stats.papers_with_source += 1;
        }
        if report.has_placeholder {
            stats.placeholders += 1;
        }
        stats.versions += report.versions.len();
        if report.has_metadata {
            stats.metadata_files += 1;
        }
        if let Some(n) = report.references {
            stats.references_files += 1;
            stats.total_references += n;
            if n == 0 {
                stats.papers_without_arxiv_refs += 1;
            }
        }
        if report.is_valid() {
            stats.valid += 1;
        }
        if !report.warnings.is_empty() {
            stats.with_warnings += 1;
        }
        for issue in report.issues {
            *stats.issues.entry(issue).or_default() += 1;
        }
    }
    Ok(stats)
}

impl CorpusStats {
    /// Overwrite run counters with what is actually on disk.
    pub fn apply_to(&self, telemetry: &Telemetry) {
        telemetry.set(Counter::MetadataFilesWritten, self.metadata_files as u64);
        telemetry.set(Counter::ReferencesFilesWritten, self.references_files as u64);
        telemetry.set(Counter::TotalReferences, self.total_references as u64);
    }

    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Corpus")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);
        let rows = [
            ("Papers", self.papers),
            ("With source", self.papers_with_source),
            ("Placeholders", self.placeholders),
            ("Versions", self.versions),
            ("metadata.json", self.metadata_files),
            ("references.json", self.references_files),
            ("arXiv references", self.total_references),
            ("No arXiv references", self.papers_without_arxiv_refs),
            ("Valid", self.valid),
            ("With warnings", self.with_warnings),
        ];
        for (label, n) in rows {
            table.add_row(vec![Cell::new(label), Cell::new(fmt_num(n))]);
        }
        let mut issues: Vec<_> = self.issues.iter().collect();
        issues.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (issue, n) in issues.into_iter().take(5) {
            table.add_row(vec![
                Cell::new(issue).fg(Color::Yellow),
                Cell::new(fmt_num(*n)),
            ]);
        }
        table.to_string()
    }

    pub fn print(&self) {
        eprintln!("\n{}", self.format_table());
    }

    pub fn log(&self) {
        log::info!(
            "Corpus: {} papers, {} with source, {} placeholders, {} valid, {} metadata, {} references files",
            self.papers,
            self.papers_with_source,
            self.placeholders,
            self.valid,
            self.metadata_files,
            self.references_files,
        );
        for (issue, n) in &self.issues {
            log::warn!("{n} papers: {issue}");
        }
    }
}

/// Remove every `<data_root>/*/tmp_download` left behind by a crash.
pub fn sweep_stale_scratch(data_root: &Path) -> usize {
    let root = glob::Pattern::escape(&data_root.to_string_lossy());
    let pattern = format!("{root}/*/{SCRATCH_DIR}");
    let Ok(paths) = glob::glob(&pattern) else {
        return 0;
    };
    let mut removed = 0;
    for path in paths.filter_map(Result::ok) {
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                log::warn!("Removed stale scratch {}", path.display());
                removed += 1;
            }
            Err(e) => log::warn!("Cannot remove stale scratch {}: {e}", path.display()),
        }
    }
    removed
}
