//! Source stage settings

use crate::collect::CollectOptions;

#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Highest version number tried per paper
    pub max_versions: u32,
    pub collect: CollectOptions,
    /// Papers without any source count as skipped (true) or failed (false)
    pub skip_missing_source: bool,
    pub workers: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_versions: 20,
            collect: CollectOptions::default(),
            skip_missing_source: true,
            workers: 16,
        }
    }
}

impl SourceConfig {
    /// Bibliography threshold given in MiB, as on the command line
    pub fn with_bib_threshold_mb(mut self, mb: f64) -> Self {
        self.collect.bib_threshold = (mb.max(0.0) * 1024.0 * 1024.0) as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_in_mb() {
        let c = SourceConfig::default().with_bib_threshold_mb(0.5);
        assert_eq!(c.collect.bib_threshold, 512 * 1024);
        assert_eq!(SourceConfig::default().collect.bib_threshold, 5 * 1024 * 1024);
    }
}
