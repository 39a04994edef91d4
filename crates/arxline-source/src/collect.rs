//! Copy `.tex` / `.bib` files out of an extracted tree

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

/// Bibliography size policy
#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    pub skip_large_bib: bool,
    pub bib_threshold: u64,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            skip_large_bib: true,
            bib_threshold: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub copied: usize,
    pub bib_skipped: usize,
}

enum SourceKind {
    Tex,
    Bib,
}

fn source_kind(path: &Path) -> Option<SourceKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "tex" => Some(SourceKind::Tex),
        "bib" => Some(SourceKind::Bib),
        _ => None,
    }
}

/// Mirror every `.tex` and `.bib` under `source` into `dest`.
///
/// Relative paths are preserved and `dest` is only created once something is
/// copied. Oversized `.bib` files are skipped when the policy says so.
/// Per-file failures are logged and skipped.
pub fn collect(source: &Path, dest: &Path, opts: CollectOptions) -> CollectStats {
    let mut stats = CollectStats::default();
    for entry in WalkDir::new(source).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(kind) = source_kind(path) else {
            continue;
        };
        if let SourceKind::Bib = kind {
            if opts.skip_large_bib {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if size > opts.bib_threshold {
                    log::info!(
                        "Skipping large .bib ({}): {}",
                        arxline_core::fmt_mib(size),
                        path.display()
                    );
                    stats.bib_skipped += 1;
                    continue;
                }
            }
        }

        let Ok(rel) = path.strip_prefix(source) else {
            continue;
        };
        let target = dest.join(rel);
        let copied = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(path, &target));
        match copied {
            Ok(_) => {
                log::debug!("Copied {}", rel.display());
                stats.copied += 1;
            }
            Err(e) => log::warn!("Failed to copy {}: {e}", path.display()),
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(root: &Path) {
        fs::create_dir_all(root.join("sections/deep")).unwrap();
        fs::write(root.join("main.tex"), b"\\input{sections/intro}").unwrap();
        fs::write(root.join("sections/intro.tex"), b"intro").unwrap();
        fs::write(root.join("sections/deep/x.TEX"), b"x").unwrap();
        fs::write(root.join("refs.bib"), vec![b'@'; 2048]).unwrap();
        fs::write(root.join("fig.png"), b"png").unwrap();
        fs::write(root.join("main.bbl"), b"bbl").unwrap();
    }

    #[test]
    fn mirrors_relative_paths_byte_identical() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        tree(&src);

        let stats = collect(&src, &dest, CollectOptions::default());
        assert_eq!(stats, CollectStats { copied: 4, bib_skipped: 0 });
        assert_eq!(fs::read(dest.join("sections/intro.tex")).unwrap(), b"intro");
        assert_eq!(fs::read(dest.join("refs.bib")).unwrap(), vec![b'@'; 2048]);
        assert!(dest.join("sections/deep/x.TEX").exists());
        assert!(!dest.join("fig.png").exists());
        assert!(!dest.join("main.bbl").exists());
    }

    #[test]
    fn skips_large_bib() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        tree(&src);

        let opts = CollectOptions {
            skip_large_bib: true,
            bib_threshold: 1024,
        };
        let stats = collect(&src, &dest, opts);
        assert_eq!(stats, CollectStats { copied: 3, bib_skipped: 1 });
        assert!(!dest.join("refs.bib").exists());
    }

    #[test]
    fn large_bib_kept_when_policy_off() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        tree(&src);

        let opts = CollectOptions {
            skip_large_bib: false,
            bib_threshold: 1024,
        };
        assert_eq!(collect(&src, &dest, opts).copied, 4);
        assert!(dest.join("refs.bib").exists());
    }

    #[test]
    fn nothing_to_copy_leaves_no_dest() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("only.pdf"), b"%PDF").unwrap();
        let dest = dir.path().join("dest");

        assert_eq!(collect(&src, &dest, CollectOptions::default()).copied, 0);
        assert!(!dest.exists());
    }
}
