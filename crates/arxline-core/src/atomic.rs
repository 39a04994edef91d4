//! Crash-safe file writes: tmp sibling → fsync → rename

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Temporary sibling used while `path` is being rewritten
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with `contents`.
///
/// A crash at any point leaves either the previous file or the new one,
/// never a torn mix.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_sibling(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Atomically write `value` as pretty-printed JSON (UTF-8 kept as-is).
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let mut json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    json.push(b'\n');
    write_atomic(path, &json)
}

/// Remove stale .tmp files in a directory (left behind by a killed run)
pub fn cleanup_tmp_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!dir.path().join("cache.json.tmp").exists());
    }

    #[test]
    fn write_atomic_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/metadata.json");
        write_atomic(&path, b"{}").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn write_json_keeps_unicode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.json");
        let mut map = BTreeMap::new();
        map.insert("author", "Jürgen Schmidhuber");
        write_json_atomic(&path, &map).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Jürgen"));
    }

    #[test]
    fn cleanup_tmp_files_removes_only_tmp() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.json.tmp"), b"stale").unwrap();
        fs::write(dir.path().join("b.json"), b"keep").unwrap();
        fs::write(dir.path().join("c.tmp"), b"stale2").unwrap();

        assert_eq!(cleanup_tmp_files(dir.path()).unwrap(), 2);

        assert!(!dir.path().join("a.json.tmp").exists());
        assert!(dir.path().join("b.json").exists());
        assert!(!dir.path().join("c.tmp").exists());
    }
}
