//! [`VersionSource`] backed by the arXiv API

use std::path::{Path, PathBuf};

use arxline_arxiv::{ArxivClient, split_version};
use arxline_core::FetchError;

use crate::fetcher::VersionSource;

impl VersionSource for ArxivClient {
    fn lookup(&self, versioned_id: &str) -> Result<Option<String>, FetchError> {
        let fallback = split_version(versioned_id).1.unwrap_or(1);
        Ok(self
            .lookup_version(versioned_id)?
            .map(|entry| entry.version_tag(fallback)))
    }

    fn download(&self, versioned_id: &str, save_dir: &Path) -> Result<PathBuf, FetchError> {
        self.download_source(versioned_id, save_dir)
    }
}
