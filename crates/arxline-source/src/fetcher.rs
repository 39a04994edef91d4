//! Versioned source fetching: `v1..=vN` until the first gap or failure

use std::path::{Path, PathBuf};

use arxline_arxiv::PaperId;
use arxline_core::{FetchError, is_shutdown_requested};
use rustc_hash::FxHashSet;

/// Remote lookup-and-download for exact versioned ids.
///
/// Implementations own retries and rate limiting; the fetch loop calls each
/// method at most once per version.
pub trait VersionSource: Sync {
    /// Canonical version tag if `versioned_id` exists, `None` if it does not.
    fn lookup(&self, versioned_id: &str) -> Result<Option<String>, FetchError>;

    /// Download the source archive for `versioned_id` into `save_dir`.
    fn download(&self, versioned_id: &str, save_dir: &Path) -> Result<PathBuf, FetchError>;
}

/// One downloaded revision awaiting extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedVersion {
    pub archive: PathBuf,
    pub version_tag: String,
}

/// Why the version loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Reached `max_versions`
    Exhausted,
    /// arXiv has no such version; later ones cannot exist either
    NotFound(u32),
    LookupFailed(u32),
    DownloadFailed(u32),
    /// Download reported success but left no bytes on disk
    EmptyDownload(u32),
    Shutdown,
}

impl StopReason {
    /// Stopped on a remote or transfer error rather than a clean end
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::LookupFailed(_) | Self::DownloadFailed(_) | Self::EmptyDownload(_)
        )
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub versions: Vec<FetchedVersion>,
    /// Versions passed over because they were already collected
    pub skipped: usize,
    pub stop: StopReason,
}

/// Download every revision of `base` in ascending order.
///
/// Versions listed in `skip` are counted and passed over without touching the
/// remote; a skip never ends the loop. The loop ends at the first missing
/// version, lookup or download error, or empty file, keeping what it has.
pub fn fetch_all_versions<S: VersionSource + ?Sized>(
    source: &S,
    base: &PaperId,
    save_dir: &Path,
    max_versions: u32,
    skip: &FxHashSet<String>,
) -> FetchOutcome {
    let mut versions = Vec::new();
    let mut skipped = 0;

    for v in 1..=max_versions {
        if is_shutdown_requested() {
            return FetchOutcome { versions, skipped, stop: StopReason::Shutdown };
        }
        let tag = format!("v{v}");
        if skip.contains(&tag) {
            log::debug!("{base}{tag}: already collected, skipping");
            skipped += 1;
            continue;
        }

        let versioned = base.versioned(v);
        let version_tag = match source.lookup(&versioned) {
            Ok(Some(canonical)) => canonical,
            Ok(None) => {
                log::debug!("{versioned}: not found, no later versions");
                return FetchOutcome { versions, skipped, stop: StopReason::NotFound(v) };
            }
            Err(e) => {
                log::warn!("{versioned}: lookup failed: {e}");
                return FetchOutcome { versions, skipped, stop: StopReason::LookupFailed(v) };
            }
        };

        let archive = match source.download(&versioned, save_dir) {
            Ok(path) => path,
            Err(e) => {
                log::warn!("Failed to download {versioned}: {e}");
                return FetchOutcome { versions, skipped, stop: StopReason::DownloadFailed(v) };
            }
        };
        if !std::fs::metadata(&archive).is_ok_and(|m| m.len() > 0) {
            log::warn!("{versioned}: download left no data at {}", archive.display());
            return FetchOutcome { versions, skipped, stop: StopReason::EmptyDownload(v) };
        }
        versions.push(FetchedVersion { archive, version_tag });
    }

    FetchOutcome { versions, skipped, stop: StopReason::Exhausted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arxline_core::StreamError;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Remote with versions `1..=available`; `fail_download` breaks one
    struct Remote {
        available: u32,
        fail_download: Option<u32>,
        empty_download: Option<u32>,
        calls: Mutex<Vec<String>>,
    }

    impl Remote {
        fn new(available: u32) -> Self {
            Self {
                available,
                fail_download: None,
                empty_download: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn version_of(id: &str) -> u32 {
            arxline_arxiv::split_version(id).1.unwrap()
        }
    }

    impl VersionSource for Remote {
        fn lookup(&self, id: &str) -> Result<Option<String>, FetchError> {
            self.calls.lock().unwrap().push(format!("lookup {id}"));
            let v = Self::version_of(id);
            Ok((v <= self.available).then(|| format!("v{v}")))
        }

        fn download(&self, id: &str, save_dir: &Path) -> Result<PathBuf, FetchError> {
            self.calls.lock().unwrap().push(format!("download {id}"));
            let v = Self::version_of(id);
            if self.fail_download == Some(v) {
                return Err(FetchError::Stream(StreamError::Http {
                    status: Some(503),
                    message: "unavailable".into(),
                }));
            }
            std::fs::create_dir_all(save_dir)?;
            let path = save_dir.join(format!("{id}.tar.gz"));
            let data: &[u8] = if self.empty_download == Some(v) { b"" } else { b"data" };
            std::fs::write(&path, data)?;
            Ok(path)
        }
    }

    fn base() -> PaperId {
        "2402.10011".parse().unwrap()
    }

    #[test]
    fn stops_at_first_gap() {
        let dir = TempDir::new().unwrap();
        let remote = Remote::new(3);
        let out = fetch_all_versions(&remote, &base(), dir.path(), 20, &FxHashSet::default());
        let tags: Vec<_> = out.versions.iter().map(|v| v.version_tag.as_str()).collect();
        assert_eq!(tags, vec!["v1", "v2", "v3"]);
        assert_eq!(out.stop, StopReason::NotFound(4));
        assert!(!remote.calls.lock().unwrap().iter().any(|c| c.contains("v5")));
    }

    #[test]
    fn download_failure_keeps_earlier_versions() {
        let dir = TempDir::new().unwrap();
        let mut remote = Remote::new(5);
        remote.fail_download = Some(3);
        let out = fetch_all_versions(&remote, &base(), dir.path(), 20, &FxHashSet::default());
        assert_eq!(out.versions.len(), 2);
        assert_eq!(out.stop, StopReason::DownloadFailed(3));
        assert!(out.stop.is_failure());
        let calls = remote.calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c.contains("v4")));
    }

    #[test]
    fn empty_download_stops() {
        let dir = TempDir::new().unwrap();
        let mut remote = Remote::new(5);
        remote.empty_download = Some(2);
        let out = fetch_all_versions(&remote, &base(), dir.path(), 20, &FxHashSet::default());
        assert_eq!(out.versions.len(), 1);
        assert_eq!(out.stop, StopReason::EmptyDownload(2));
    }

    #[test]
    fn skipped_versions_do_not_stop_the_loop() {
        let dir = TempDir::new().unwrap();
        let remote = Remote::new(3);
        let skip: FxHashSet<String> = ["v1".to_string(), "v2".to_string()].into_iter().collect();
        let out = fetch_all_versions(&remote, &base(), dir.path(), 20, &skip);
        assert_eq!(out.skipped, 2);
        assert_eq!(out.versions.len(), 1);
        assert_eq!(out.versions[0].version_tag, "v3");
        let calls = remote.calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c.contains("v1") || c.contains("v2")));
    }

    #[test]
    fn respects_max_versions() {
        let dir = TempDir::new().unwrap();
        let remote = Remote::new(10);
        let out = fetch_all_versions(&remote, &base(), dir.path(), 2, &FxHashSet::default());
        assert_eq!(out.versions.len(), 2);
        assert_eq!(out.stop, StopReason::Exhausted);
    }

    #[test]
    fn no_versions_at_all() {
        let dir = TempDir::new().unwrap();
        let remote = Remote::new(0);
        let out = fetch_all_versions(&remote, &base(), dir.path(), 20, &FxHashSet::default());
        assert!(out.versions.is_empty());
        assert_eq!(out.stop, StopReason::NotFound(1));
    }
}
