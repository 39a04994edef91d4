//! Figure stripping and directory sizing

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

/// Binary figure formats removed from extracted sources (lowercase)
pub const FIGURE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "pdf", "eps", "ps", "svg", "gif", "tif", "tiff",
];

pub fn is_figure(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| FIGURE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Remove every figure file under `dir`; returns `(files_removed, bytes_freed)`.
///
/// A file that cannot be removed is logged and left in place.
pub fn strip(dir: &Path) -> (usize, u64) {
    let mut removed = 0;
    let mut freed = 0;
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() || !is_figure(entry.path()) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                removed += 1;
                freed += size;
            }
            Err(e) => log::warn!("Failed to remove {}: {e}", entry.path().display()),
        }
    }
    if removed > 0 {
        log::debug!(
            "Removed {removed} figure files, freed {}",
            arxline_core::fmt_mib(freed)
        );
    }
    (removed, freed)
}

/// Total bytes of regular files under `dir` (0 if it does not exist)
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn strips_figures_keeps_sources() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("figs/sub")).unwrap();
        fs::write(root.join("main.tex"), b"tex").unwrap();
        fs::write(root.join("refs.bib"), b"bib").unwrap();
        fs::write(root.join("figs/a.PNG"), vec![0u8; 100]).unwrap();
        fs::write(root.join("figs/sub/b.eps"), vec![0u8; 50]).unwrap();
        fs::write(root.join("plot.pdf"), vec![0u8; 10]).unwrap();
        fs::write(root.join("style.sty"), b"sty").unwrap();

        assert_eq!(strip(root), (3, 160));
        assert!(root.join("main.tex").exists());
        assert!(root.join("refs.bib").exists());
        assert!(root.join("style.sty").exists());
        assert!(!root.join("figs/a.PNG").exists());
        assert!(!root.join("plot.pdf").exists());
    }

    #[test]
    fn strip_missing_dir_is_noop() {
        let dir = TempDir::new().unwrap();
        assert_eq!(strip(&dir.path().join("nope")), (0, 0));
    }

    #[test]
    fn figure_extensions() {
        assert!(is_figure(Path::new("a.JPEG")));
        assert!(is_figure(Path::new("x/y.tiff")));
        assert!(!is_figure(Path::new("a.tex")));
        assert!(!is_figure(Path::new("png")));
    }

    #[test]
    fn sizes_directory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/x"), vec![0u8; 7]).unwrap();
        fs::write(dir.path().join("y"), vec![0u8; 5]).unwrap();
        assert_eq!(dir_size(dir.path()), 12);
        assert_eq!(dir_size(&dir.path().join("missing")), 0);
    }
}
