//! References stage: `references.json` per paper plus a resumable owner cache

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use arxline_arxiv::PaperId;
use arxline_core::{
    Counter, FetchError, SharedTelemetry, WorkQueue, is_shutdown_requested, write_json_atomic,
};
use indicatif::ProgressBar;
use serde::Serialize;

use crate::api::{Reference, S2Client};

/// Cache is flushed after this many newly fetched papers
const SAVE_EVERY: usize = 50;

type Cache = BTreeMap<String, Vec<Reference>>;

/// Anything that can list a paper's references
pub trait ReferenceSource: Sync {
    fn paper_references(&self, arxiv_id: &str) -> Result<Vec<Reference>, FetchError>;
}

impl ReferenceSource for S2Client {
    fn paper_references(&self, arxiv_id: &str) -> Result<Vec<Reference>, FetchError> {
        S2Client::paper_references(self, arxiv_id)
    }
}

/// Value type of `references.json`, keyed by the cited paper's arXiv id
#[derive(Serialize)]
struct CitedPaper<'a> {
    title: &'a str,
    authors: &'a [String],
    year: Option<i32>,
    publication_date: Option<&'a str>,
    semantic_scholar_id: &'a str,
}

fn arxiv_references(refs: &[Reference]) -> BTreeMap<&str, CitedPaper<'_>> {
    refs.iter()
        .filter_map(|r| {
            let id = r.arxiv_id.as_deref()?;
            Some((
                id,
                CitedPaper {
                    title: &r.title,
                    authors: &r.authors,
                    year: r.year,
                    publication_date: r.publication_date.as_deref(),
                    semantic_scholar_id: &r.semantic_scholar_id,
                },
            ))
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct ReferencesSummary {
    pub requested: usize,
    pub from_cache: usize,
    pub fetched: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl ReferencesSummary {
    pub fn log(&self) {
        log::info!(
            "References stage: {} papers ({} cached, {} fetched, {} failed) [{:.1}s]",
            self.requested,
            self.from_cache,
            self.fetched,
            self.failed,
            self.elapsed.as_secs_f64(),
        );
    }
}

pub struct ReferencesStage<'a, S: ReferenceSource> {
    pub source: &'a S,
    pub data_root: PathBuf,
    /// `<cache_dir>/<owner>_references.json`
    pub cache_path: PathBuf,
    pub workers: usize,
    pub telemetry: SharedTelemetry,
}

impl<S: ReferenceSource> ReferencesStage<'_, S> {
    /// Fetch references for every id not already cached.
    ///
    /// Cached papers whose `references.json` went missing get it rewritten
    /// from the cache without a request.
    pub fn run(&self, ids: &[PaperId], pb: &ProgressBar) -> anyhow::Result<ReferencesSummary> {
        let start = Instant::now();
        let cache = self.load_cache();
        let mut summary = ReferencesSummary {
            requested: ids.len(),
            ..Default::default()
        };

        let mut pending = Vec::new();
        for id in ids {
            match cache.get(id.as_str()) {
                Some(refs) => {
                    summary.from_cache += 1;
                    let path = self.references_path(id);
                    if !path.exists() {
                        self.write_references(id, &path, refs);
                    }
                    pb.inc(1);
                }
                None => pending.push(id.clone()),
            }
        }
        if pending.is_empty() {
            log::info!("References cache covers all {} papers", ids.len());
            summary.elapsed = start.elapsed();
            return Ok(summary);
        }

        let workers = self.workers.max(1);
        log::info!(
            "Fetching references for {} papers using {workers} threads",
            pending.len()
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("references-{i}"))
            .build()
            .context("Failed to create thread pool")?;

        let queue = WorkQueue::new(pending);
        let state = Mutex::new((cache, 0usize, 0usize));

        pool.scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| {
                    while !is_shutdown_requested() {
                        let Some(id) = queue.next() else { break };
                        let fetched = catch_unwind(AssertUnwindSafe(|| {
                            self.source.paper_references(id.as_str())
                        }))
                        .unwrap_or_else(|_| Err(FetchError::Parse("panicked".to_string())));

                        match fetched {
                            Ok(refs) => {
                                self.record(&refs);
                                self.write_references(id, &self.references_path(id), &refs);
                                let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                                let (cache, fetched, _) = &mut *guard;
                                cache.insert(id.to_string(), refs);
                                *fetched += 1;
                                if *fetched % SAVE_EVERY == 0 {
                                    self.save_cache(cache);
                                }
                            }
                            Err(e) => {
                                log::error!("Failed to fetch references for {id}: {e}");
                                self.telemetry.incr(Counter::FailedReferences);
                                state.lock().unwrap_or_else(PoisonError::into_inner).2 += 1;
                            }
                        }
                        pb.inc(1);
                    }
                });
            }
        });

        let (cache, fetched, failed) = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        self.save_cache(&cache);
        if is_shutdown_requested() && queue.remaining() > 0 {
            log::warn!("Cancelled reference fetching, {} papers left", queue.remaining());
        }
        summary.fetched = fetched;
        summary.failed = failed;
        summary.elapsed = start.elapsed();
        Ok(summary)
    }

    fn references_path(&self, id: &PaperId) -> PathBuf {
        self.data_root.join(id.folder_name()).join("references.json")
    }

    fn record(&self, refs: &[Reference]) {
        let on_arxiv = refs.iter().filter(|r| r.arxiv_id.is_some()).count() as u64;
        let total = refs.len() as u64;
        self.telemetry.add(Counter::TotalReferences, total);
        self.telemetry.add(Counter::SuccessfulReferences, on_arxiv);
        self.telemetry.add(Counter::FailedReferences, total - on_arxiv);
    }

    fn write_references(&self, id: &PaperId, path: &Path, refs: &[Reference]) {
        match write_json_atomic(path, &arxiv_references(refs)) {
            Ok(()) => self.telemetry.incr(Counter::ReferencesFilesWritten),
            Err(e) => log::warn!("Failed to write references.json for {id}: {e}"),
        }
    }

    fn save_cache(&self, cache: &Cache) {
        if let Err(e) = write_json_atomic(&self.cache_path, cache) {
            log::error!("Failed to save references cache: {e}");
        }
    }

    fn load_cache(&self) -> Cache {
        let Ok(text) = std::fs::read_to_string(&self.cache_path) else {
            return Cache::new();
        };
        match serde_json::from_str::<Cache>(&text) {
            Ok(cache) => {
                log::info!("Loaded {} papers from references cache", cache.len());
                cache
            }
            Err(e) => {
                log::warn!("References cache malformed, starting fresh: {e}");
                Cache::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arxline_core::{StreamError, Telemetry};
    use tempfile::TempDir;

    struct FakeS2 {
        calls: Mutex<Vec<String>>,
        fail: Option<&'static str>,
    }

    impl FakeS2 {
        fn new(fail: Option<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    fn reference(title: &str, arxiv_id: Option<&str>) -> Reference {
        Reference {
            title: title.to_string(),
            authors: vec!["A. Author".to_string()],
            year: Some(2020),
            publication_date: None,
            semantic_scholar_id: format!("s2-{title}"),
            arxiv_id: arxiv_id.map(str::to_string),
        }
    }

    impl ReferenceSource for FakeS2 {
        fn paper_references(&self, arxiv_id: &str) -> Result<Vec<Reference>, FetchError> {
            self.calls.lock().unwrap().push(arxiv_id.to_string());
            if self.fail == Some(arxiv_id) {
                return Err(FetchError::Stream(StreamError::Http {
                    status: Some(500),
                    message: "boom".into(),
                }));
            }
            Ok(vec![
                reference("on-arxiv", Some("2001.00001")),
                reference("journal-only", None),
            ])
        }
    }

    fn ids(n: u32) -> Vec<PaperId> {
        (1..=n).map(|i| PaperId::from_parts(2024, 2, i)).collect()
    }

    fn stage<'a>(source: &'a FakeS2, dir: &Path, telemetry: SharedTelemetry) -> ReferencesStage<'a, FakeS2> {
        ReferencesStage {
            source,
            data_root: dir.join("data"),
            cache_path: dir.join("cache/me_references.json"),
            workers: 2,
            telemetry,
        }
    }

    #[test]
    fn writes_only_arxiv_references() {
        let dir = TempDir::new().unwrap();
        let source = FakeS2::new(None);
        let telemetry = Telemetry::shared();
        let summary = stage(&source, dir.path(), telemetry.clone())
            .run(&ids(3), &ProgressBar::hidden())
            .unwrap();
        assert_eq!(summary.fetched, 3);

        let path = dir.path().join("data/2402-00001/references.json");
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        let obj = written.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["2001.00001"]["title"], "on-arxiv");
        assert!(obj["2001.00001"].get("arxiv_id").is_none());

        assert_eq!(telemetry.get(Counter::TotalReferences), 6);
        assert_eq!(telemetry.get(Counter::SuccessfulReferences), 3);
        assert_eq!(telemetry.get(Counter::FailedReferences), 3);
        assert_eq!(telemetry.get(Counter::ReferencesFilesWritten), 3);
    }

    #[test]
    fn cached_papers_are_not_refetched() {
        let dir = TempDir::new().unwrap();
        let source = FakeS2::new(None);
        stage(&source, dir.path(), Telemetry::shared())
            .run(&ids(2), &ProgressBar::hidden())
            .unwrap();
        assert_eq!(source.calls.lock().unwrap().len(), 2);

        std::fs::remove_file(dir.path().join("data/2402-00002/references.json")).unwrap();
        let summary = stage(&source, dir.path(), Telemetry::shared())
            .run(&ids(3), &ProgressBar::hidden())
            .unwrap();
        assert_eq!(summary.from_cache, 2);
        assert_eq!(summary.fetched, 1);
        assert_eq!(source.calls.lock().unwrap().len(), 3);
        assert!(dir.path().join("data/2402-00002/references.json").exists());
    }

    #[test]
    fn failed_fetch_is_retried_next_run() {
        let dir = TempDir::new().unwrap();
        let failing = FakeS2::new(Some("2402.00002"));
        let telemetry = Telemetry::shared();
        let summary = stage(&failing, dir.path(), telemetry.clone())
            .run(&ids(3), &ProgressBar::hidden())
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.fetched, 2);
        assert!(!dir.path().join("data/2402-00002/references.json").exists());

        let healthy = FakeS2::new(None);
        stage(&healthy, dir.path(), Telemetry::shared())
            .run(&ids(3), &ProgressBar::hidden())
            .unwrap();
        assert_eq!(*healthy.calls.lock().unwrap(), vec!["2402.00002"]);
    }

    #[test]
    fn malformed_cache_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache/me_references.json");
        std::fs::create_dir_all(cache.parent().unwrap()).unwrap();
        std::fs::write(&cache, "[1, 2").unwrap();
        let source = FakeS2::new(None);
        let summary = stage(&source, dir.path(), Telemetry::shared())
            .run(&ids(1), &ProgressBar::hidden())
            .unwrap();
        assert_eq!(summary.fetched, 1);
        let reloaded: Cache = serde_json::from_str(&std::fs::read_to_string(cache).unwrap()).unwrap();
        assert!(reloaded.contains_key("2402.00001"));
    }
}
