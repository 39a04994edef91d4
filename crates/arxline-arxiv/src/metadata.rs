//! Metadata stage: per-paper `metadata.json` plus a resumable owner cache

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use arxline_core::{
    Counter, FetchError, SharedTelemetry, is_shutdown_requested, write_json_atomic,
};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::id::PaperId;

/// Descriptive metadata written to `<paper_dir>/metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub submission_date: String,
    #[serde(default)]
    pub revised_dates: Vec<String>,
    #[serde(default)]
    pub journal_ref: Option<String>,
}

impl PaperMetadata {
    pub fn new(
        title: String,
        authors: Vec<String>,
        submission_date: String,
        revised_dates: Vec<String>,
        journal_ref: Option<String>,
    ) -> Self {
        Self {
            title,
            authors: authors.into_iter().map(|a| a.trim().to_string()).collect(),
            submission_date,
            revised_dates: dedup_preserving_order(revised_dates),
            journal_ref,
        }
    }
}

/// Anything that can answer batched metadata queries
pub trait MetadataSource: Sync {
    fn batch_size(&self) -> usize;
    fn batch_metadata(&self, ids: &[PaperId]) -> Result<Vec<(PaperId, PaperMetadata)>, FetchError>;
}

/// Fetches metadata for every id not already in the owner cache.
pub struct MetadataStage<'a, S: MetadataSource> {
    pub source: &'a S,
    pub data_root: PathBuf,
    /// `<cache_dir>/<owner>_metadata.json`
    pub cache_path: PathBuf,
    pub telemetry: SharedTelemetry,
}

impl<S: MetadataSource> MetadataStage<'_, S> {
    /// Run the stage; returns the number of ids with metadata afterwards.
    ///
    /// A failed batch is logged and skipped; the next run picks it up again.
    pub fn run(&self, ids: &[PaperId]) -> anyhow::Result<usize> {
        let mut cache = self.load_cache();
        let remaining: Vec<PaperId> = ids
            .iter()
            .filter(|id| !cache.contains_key(id.as_str()))
            .cloned()
            .collect();
        if remaining.is_empty() {
            log::info!("Metadata cache covers all {} papers", ids.len());
            return Ok(cache.len());
        }
        if !cache.is_empty() {
            log::info!("Resuming: {} papers already in metadata cache", cache.len());
        }

        let batch_size = self.source.batch_size().max(1);
        let n_batches = remaining.len().div_ceil(batch_size);
        for (i, batch) in remaining.chunks(batch_size).enumerate() {
            if is_shutdown_requested() {
                log::warn!("Metadata stage interrupted after {i} batches");
                break;
            }
            log::info!("Fetching metadata batch {}/{n_batches} ({} papers)", i + 1, batch.len());
            let fetched = match self.source.batch_metadata(batch) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("Metadata batch {} failed: {e}", i + 1);
                    continue;
                }
            };

            for (id, meta) in &fetched {
                cache.insert(id.to_string(), meta.clone());
            }
            write_json_atomic(&self.cache_path, &cache)
                .with_context(|| format!("Cannot write {}", self.cache_path.display()))?;

            for (id, meta) in &fetched {
                let path = self.data_root.join(id.folder_name()).join("metadata.json");
                match write_json_atomic(&path, meta) {
                    Ok(()) => self.telemetry.incr(Counter::MetadataFilesWritten),
                    Err(e) => log::warn!("Failed to write metadata.json for {id}: {e}"),
                }
            }
            log::info!("Progress saved: {}/{} papers", cache.len(), ids.len());
        }
        Ok(cache.len())
    }

    fn load_cache(&self) -> BTreeMap<String, PaperMetadata> {
        let Ok(text) = std::fs::read_to_string(&self.cache_path) else {
            return BTreeMap::new();
        };
        match serde_json::from_str(&text) {
            Ok(cache) => cache,
            Err(e) => {
                log::warn!(
                    "Metadata cache {} unreadable, starting fresh: {e}",
                    self.cache_path.display()
                );
                BTreeMap::new()
            }
        }
    }
}

/// Drop empty and repeated entries, keeping first occurrences in order
fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = FxHashSet::default();
    items
        .into_iter()
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arxline_core::Telemetry;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeSource {
        calls: Mutex<Vec<usize>>,
        fail_batch: Option<usize>,
    }

    impl FakeSource {
        fn new(fail_batch: Option<usize>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_batch,
            }
        }
    }

    impl MetadataSource for FakeSource {
        fn batch_size(&self) -> usize {
            2
        }

        fn batch_metadata(
            &self,
            ids: &[PaperId],
        ) -> Result<Vec<(PaperId, PaperMetadata)>, FetchError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(ids.len());
            if self.fail_batch == Some(calls.len()) {
                return Err(FetchError::Parse("boom".into()));
            }
            Ok(ids
                .iter()
                .map(|id| {
                    let meta = PaperMetadata::new(
                        format!("Title {id}"),
                        vec![" A ".into()],
                        "2024-02-15T18:59:59+00:00".into(),
                        vec![],
                        None,
                    );
                    (id.clone(), meta)
                })
                .collect())
        }
    }

    fn ids(n: u32) -> Vec<PaperId> {
        (1..=n).map(|i| PaperId::from_parts(2024, 2, i)).collect()
    }

    #[test]
    fn dedup_keeps_order() {
        let v = dedup_preserving_order(vec!["b".into(), "a".into(), "b".into(), "".into()]);
        assert_eq!(v, vec!["b", "a"]);
    }

    #[test]
    fn writes_files_and_cache() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new(None);
        let telemetry = Telemetry::shared();
        let stage = MetadataStage {
            source: &source,
            data_root: dir.path().join("data"),
            cache_path: dir.path().join("cache/o_metadata.json"),
            telemetry: telemetry.clone(),
        };
        assert_eq!(stage.run(&ids(3)).unwrap(), 3);
        assert_eq!(*source.calls.lock().unwrap(), vec![2, 1]);
        assert_eq!(telemetry.get(Counter::MetadataFilesWritten), 3);

        let text =
            std::fs::read_to_string(dir.path().join("data/2402-00001/metadata.json")).unwrap();
        let meta: PaperMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(meta.authors, vec!["A"]);
        assert!(text.contains("\"journal_ref\": null"));

        // Second run is served from the cache
        assert_eq!(stage.run(&ids(3)).unwrap(), 3);
        assert_eq!(source.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn failed_batch_is_skipped() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new(Some(1));
        let stage = MetadataStage {
            source: &source,
            data_root: dir.path().join("data"),
            cache_path: dir.path().join("o_metadata.json"),
            telemetry: Telemetry::shared(),
        };
        assert_eq!(stage.run(&ids(4)).unwrap(), 2);
        assert!(!dir.path().join("data/2402-00001").exists());
        assert!(dir.path().join("data/2402-00003/metadata.json").exists());
    }
}
