//! Per-paper pipeline: fetch → extract → collect → strip → record → clean up

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use arxline_arxiv::PaperId;
use arxline_core::{Counter, SharedTelemetry, SizeSample};

use crate::archive::{self, ExtractError};
use crate::collect::collect;
use crate::config::SourceConfig;
use crate::fetcher::{FetchedVersion, StopReason, VersionSource, fetch_all_versions};
use crate::figures::{dir_size, strip};
use crate::layout::{PaperLayout, ScratchDir};
use crate::skip_cache::SkipCache;

/// Result of processing one paper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperOutcome {
    Success,
    Skipped,
    Failed,
}

impl std::fmt::Display for PaperOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Everything one paper's processing needs, shared across workers.
pub struct PaperPipeline<'a, S: VersionSource + ?Sized> {
    pub source: &'a S,
    pub cache: &'a SkipCache,
    pub data_root: PathBuf,
    pub config: SourceConfig,
    pub telemetry: SharedTelemetry,
}

impl<S: VersionSource + ?Sized> PaperPipeline<'_, S> {
    /// Process one paper. Never returns an error: any failure is logged and
    /// reported as [`PaperOutcome::Failed`].
    pub fn process(&self, id: &PaperId) -> PaperOutcome {
        match self.try_process(id) {
            Ok(outcome) => {
                log::debug!("{id}: {outcome}");
                outcome
            }
            Err(e) => {
                log::error!("{id}: {e:#}");
                PaperOutcome::Failed
            }
        }
    }

    fn try_process(&self, id: &PaperId) -> anyhow::Result<PaperOutcome> {
        let layout = PaperLayout::new(&self.data_root, id);
        fs::create_dir_all(layout.paper_dir())
            .with_context(|| format!("Cannot create {}", layout.paper_dir().display()))?;
        let scratch = ScratchDir::create(layout.scratch_dir())
            .context("Cannot create scratch directory")?;

        let known = self.cache.versions(id.as_str());
        let fetched = fetch_all_versions(
            self.source,
            id,
            scratch.path(),
            self.config.max_versions,
            &known,
        );
        if fetched.stop.is_failure() {
            self.telemetry.incr(Counter::DownloadFailures);
        }

        if fetched.versions.is_empty() {
            return Ok(self.nothing_fetched(id, &layout, fetched.skipped, &fetched.stop));
        }

        let mut collected_any = false;
        for version in &fetched.versions {
            collected_any |= self.process_version(id, &layout, scratch.path(), version);
        }
        if collected_any {
            layout.remove_placeholder();
        }
        Ok(PaperOutcome::Success)
    }

    /// Outcome when the loop produced no new archive.
    fn nothing_fetched(
        &self,
        id: &PaperId,
        layout: &PaperLayout,
        skipped: usize,
        stop: &StopReason,
    ) -> PaperOutcome {
        if skipped > 0 || !layout.collected_versions().is_empty() {
            log::debug!("{id}: nothing new, earlier versions already collected");
            return PaperOutcome::Success;
        }
        if *stop == StopReason::Shutdown {
            return PaperOutcome::Failed;
        }

        log::warn!("No source versions downloaded for {id}");
        if let Err(e) = layout.write_placeholder() {
            log::warn!("Failed to write placeholder for {id}: {e}");
        }
        if self.config.skip_missing_source {
            PaperOutcome::Skipped
        } else {
            PaperOutcome::Failed
        }
    }

    /// Extract, collect, and strip one version. Returns whether any file was
    /// copied. The archive and the version's scratch tree are always removed.
    fn process_version(
        &self,
        id: &PaperId,
        layout: &PaperLayout,
        scratch: &Path,
        version: &FetchedVersion,
    ) -> bool {
        let tag = &version.version_tag;
        let extract_dir = match ScratchDir::create(scratch.join(format!("extracted_{tag}"))) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("{id}{tag}: cannot create extraction dir: {e}");
                remove_archive(&version.archive);
                return false;
            }
        };

        let extracted = archive::extract(&version.archive, extract_dir.path());
        remove_archive(&version.archive);
        match extracted {
            Ok(kind) => log::debug!("{id}{tag}: {kind}"),
            Err(ExtractError::ErrorPage(_)) => {
                log::warn!("{id}{tag}: download was an error page");
                self.telemetry.incr(Counter::ExtractionFailures);
                return false;
            }
            Err(e) => {
                log::warn!("Extraction failed for {id}{tag}: {e}");
                self.telemetry.incr(Counter::ExtractionFailures);
                return false;
            }
        }

        let before = dir_size(extract_dir.path());
        let stats = collect(
            extract_dir.path(),
            &layout.version_dir(tag),
            self.config.collect,
        );
        let (figures, _) = strip(extract_dir.path());
        let after = dir_size(extract_dir.path());

        self.telemetry.record_sizes(SizeSample {
            bytes_before_strip: before,
            bytes_after_strip: after,
        });
        self.telemetry.add(Counter::TexFilesWritten, stats.copied as u64);
        self.telemetry.add(Counter::BibFilesSkipped, stats.bib_skipped as u64);
        self.telemetry.add(Counter::FiguresRemoved, figures as u64);

        if stats.copied == 0 {
            log::info!("{id}{tag}: no .tex/.bib files in source");
            return false;
        }
        self.telemetry.incr(Counter::VersionsCollected);
        if let Err(e) = self.cache.record(id.as_str(), tag) {
            log::warn!("Failed to update download cache for {id}{tag}: {e}");
        }
        log::debug!("{id}{tag}: copied {} files", stats.copied);
        true
    }
}

fn remove_archive(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Cannot remove {}: {e}", path.display()),
    }
}
