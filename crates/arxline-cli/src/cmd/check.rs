//! `arxline check` - validate harvested output on disk

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use arxline_arxiv::PaperId;
use arxline_source::{PaperReport, inspect_paper, scan_corpus};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Owner id whose corpus to check
    pub owner: String,

    /// Inspect a single paper in detail
    pub paper: Option<String>,

    /// Data directory (papers live in <data-dir>/<owner>/)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

pub fn run(args: CheckArgs, config: &Config) -> Result<ExitCode> {
    let data_root = args
        .data_dir
        .unwrap_or_else(|| config.output.data_dir.clone())
        .join(&args.owner);
    anyhow::ensure!(
        data_root.is_dir(),
        "Owner directory not found: {}",
        data_root.display()
    );

    if let Some(paper) = args.paper {
        let id: PaperId = paper
            .parse()
            .with_context(|| format!("Invalid paper id: {paper}"))?;
        let report = inspect_paper(&data_root.join(id.folder_name()));
        eprintln!("\n{}", paper_table(&report));
        return Ok(exit_code(report.is_valid()));
    }

    let stats = scan_corpus(&data_root)
        .with_context(|| format!("Cannot scan {}", data_root.display()))?;
    anyhow::ensure!(stats.papers > 0, "No paper directories in {}", data_root.display());
    stats.print();

    let report_path = data_root.join("performance_report.json");
    if report_path.exists() {
        eprintln!("Performance report: {}", report_path.display());
    } else {
        log::warn!("No performance_report.json in {}", data_root.display());
    }
    Ok(exit_code(stats.issues.is_empty()))
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn paper_table(report: &PaperReport) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(&report.folder).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    for (tag, count) in report.versions.iter().zip(&report.tex_counts) {
        table.add_row(vec![
            Cell::new(format!("{}{tag}", report.folder)),
            Cell::new(format!("{count} .tex files")),
        ]);
    }
    if report.has_placeholder {
        table.add_row(vec![Cell::new("Placeholder"), Cell::new("present")]);
    }
    table.add_row(vec![
        Cell::new("metadata.json"),
        Cell::new(if report.has_metadata { "ok" } else { "missing" }),
    ]);
    table.add_row(vec![
        Cell::new("references.json"),
        Cell::new(match report.references {
            Some(n) => format!("{n} arXiv references"),
            None => "missing".to_string(),
        }),
    ]);
    for issue in &report.issues {
        table.add_row(vec![Cell::new("Issue").fg(Color::Red), Cell::new(issue)]);
    }
    for warning in &report.warnings {
        table.add_row(vec![
            Cell::new("Warning").fg(Color::Yellow),
            Cell::new(warning),
        ]);
    }
    table.to_string()
}
