//! Download-skip cache: versions already collected, per paper.
//!
//! Stored as `<cache_dir>/<owner>_downloaded.json`, a JSON object mapping
//! paper id to a list of version tags. Every update is flushed with an atomic
//! replace while the lock is held, so the file on disk always matches a state
//! the map was actually in.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use arxline_core::write_json_atomic;
use rustc_hash::FxHashSet;

type Entries = BTreeMap<String, Vec<String>>;

#[derive(Debug)]
pub struct SkipCache {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl SkipCache {
    /// Load from `path`; a missing or unreadable file starts empty.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                log::warn!("Skip cache {} unreadable, starting fresh: {e}", path.display());
                Entries::new()
            }),
            Err(_) => Entries::new(),
        };
        if !entries.is_empty() {
            log::info!("Loaded download cache: {} papers", entries.len());
        }
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Version tags recorded for `paper_id`
    pub fn versions(&self, paper_id: &str) -> FxHashSet<String> {
        self.lock()
            .get(paper_id)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a collected version and persist. Recording twice is a no-op.
    pub fn record(&self, paper_id: &str, version_tag: &str) -> io::Result<()> {
        let mut entries = self.lock();
        let tags = entries.entry(paper_id.to_string()).or_default();
        if tags.iter().any(|t| t == version_tag) {
            return Ok(());
        }
        tags.push(version_tag.to_string());
        write_json_atomic(&self.path, &*entries)
    }

    /// Number of papers with at least one recorded version
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn record_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache/me_downloaded.json");
        let cache = SkipCache::load(&path);
        assert!(cache.is_empty());

        cache.record("2402.10011", "v1").unwrap();
        cache.record("2402.10011", "v2").unwrap();
        cache.record("2402.10011", "v1").unwrap();

        let reloaded = SkipCache::load(&path);
        let versions = reloaded.versions("2402.10011");
        assert_eq!(versions.len(), 2);
        assert!(versions.contains("v1") && versions.contains("v2"));
        assert!(reloaded.versions("2402.99999").is_empty());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["2402.10011"], serde_json::json!(["v1", "v2"]));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(SkipCache::load(&path).is_empty());
    }

    #[test]
    fn concurrent_records_all_land() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.json");
        let cache = SkipCache::load(&path);
        std::thread::scope(|s| {
            for t in 0..8 {
                let cache = &cache;
                s.spawn(move || {
                    for v in 1..=5 {
                        cache.record(&format!("2402.{t:05}"), &format!("v{v}")).unwrap();
                    }
                });
            }
        });
        let reloaded = SkipCache::load(&path);
        assert_eq!(reloaded.len(), 8);
        assert_eq!(reloaded.versions("2402.00003").len(), 5);
    }
}
