//! On-disk layout of one paper's output directory
//!
//! ```text
//! <data_root>/<folder>/
//!   tex/<folder>v<N>/...                 one subtree per collected version
//!   tex/<folder>/NO_SOURCE_AVAILABLE.txt only when no version was ever found
//!   tmp_download/                        scratch, absent at rest
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use arxline_arxiv::{PaperId, parse_version_tag};

pub const SCRATCH_DIR: &str = "tmp_download";
pub const TEX_DIR: &str = "tex";
pub const PLACEHOLDER_FILE: &str = "NO_SOURCE_AVAILABLE.txt";
const PLACEHOLDER_TEXT: &str = "Full source archive not available from arXiv for this paper.\n";

/// Paths for one paper under the data root
#[derive(Debug, Clone)]
pub struct PaperLayout {
    folder: String,
    paper_dir: PathBuf,
}

impl PaperLayout {
    pub fn new(data_root: &Path, id: &PaperId) -> Self {
        let folder = id.folder_name();
        Self {
            paper_dir: data_root.join(&folder),
            folder,
        }
    }

    pub fn paper_dir(&self) -> &Path {
        &self.paper_dir
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.paper_dir.join(SCRATCH_DIR)
    }

    pub fn tex_root(&self) -> PathBuf {
        self.paper_dir.join(TEX_DIR)
    }

    /// `tex/<folder><tag>`, e.g. `tex/2402-10011v2`
    pub fn version_dir(&self, version_tag: &str) -> PathBuf {
        self.tex_root().join(format!("{}{version_tag}", self.folder))
    }

    pub fn placeholder_path(&self) -> PathBuf {
        self.tex_root().join(&self.folder).join(PLACEHOLDER_FILE)
    }

    /// Version tags that already have a directory under `tex/`, ascending
    pub fn collected_versions(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.tex_root()) else {
            return Vec::new();
        };
        let mut versions: Vec<u32> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                parse_version_tag(name.strip_prefix(&self.folder)?)
            })
            .collect();
        versions.sort_unstable();
        versions.into_iter().map(|n| format!("v{n}")).collect()
    }

    pub fn write_placeholder(&self) -> io::Result<()> {
        let path = self.placeholder_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, PLACEHOLDER_TEXT)
    }

    /// Drop a placeholder left by an earlier run that found nothing
    pub fn remove_placeholder(&self) {
        let path = self.placeholder_path();
        if !path.exists() {
            return;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed stale placeholder {}", path.display());
                if let Some(parent) = path.parent() {
                    // Only succeeds when empty
                    let _ = fs::remove_dir(parent);
                }
            }
            Err(e) => log::warn!("Cannot remove placeholder {}: {e}", path.display()),
        }
    }
}

/// Scratch directory removed on drop, including on early return and unwind.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(path: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => log::debug!("Cleaned up {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to clean up {}: {e}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(root: &Path) -> PaperLayout {
        PaperLayout::new(root, &"2402.10011".parse().unwrap())
    }

    #[test]
    fn paths() {
        let l = layout(Path::new("/data"));
        assert_eq!(l.paper_dir(), Path::new("/data/2402-10011"));
        assert_eq!(l.scratch_dir(), Path::new("/data/2402-10011/tmp_download"));
        assert_eq!(l.version_dir("v2"), Path::new("/data/2402-10011/tex/2402-10011v2"));
        assert_eq!(
            l.placeholder_path(),
            Path::new("/data/2402-10011/tex/2402-10011/NO_SOURCE_AVAILABLE.txt")
        );
    }

    #[test]
    fn collected_versions_sorted_numerically() {
        let dir = TempDir::new().unwrap();
        let l = layout(dir.path());
        for tag in ["v10", "v2", "v1"] {
            fs::create_dir_all(l.version_dir(tag)).unwrap();
        }
        fs::create_dir_all(l.tex_root().join("2402-10011")).unwrap();
        fs::create_dir_all(l.tex_root().join("other")).unwrap();
        assert_eq!(l.collected_versions(), vec!["v1", "v2", "v10"]);
    }

    #[test]
    fn placeholder_roundtrip() {
        let dir = TempDir::new().unwrap();
        let l = layout(dir.path());
        l.write_placeholder().unwrap();
        assert!(l.placeholder_path().exists());
        l.remove_placeholder();
        assert!(!l.placeholder_path().exists());
        assert!(!l.tex_root().join("2402-10011").exists());
    }

    #[test]
    fn scratch_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p/tmp_download");
        {
            let scratch = ScratchDir::create(path.clone()).unwrap();
            fs::write(scratch.path().join("x"), b"x").unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn scratch_removed_on_panic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tmp_download");
        let p = path.clone();
        let result = std::panic::catch_unwind(move || {
            let _scratch = ScratchDir::create(p).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
