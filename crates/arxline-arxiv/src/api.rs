//! arXiv Atom API client.
//!
//! Queries go through a shared [`Throttle`] (arXiv asks for one request every
//! three seconds) and [`retry_with_backoff`]. Responses are deserialized once
//! into explicit feed structs; nothing downstream touches raw XML.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use arxline_core::{
    FetchError, SharedTelemetry, Throttle, download_to_file, get_text, retry_with_backoff,
};
use serde::Deserialize;

use crate::id::{PaperId, split_version};
use crate::metadata::PaperMetadata;

/// Entry ids under this prefix are API error reports, not papers
const API_ERROR_MARKER: &str = "arxiv.org/api/errors";

/// Endpoints and pacing for [`ArxivClient`]
#[derive(Debug, Clone)]
pub struct ArxivConfig {
    pub api_url: String,
    pub source_url: String,
    pub delay: Duration,
    pub batch_size: usize,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            api_url: "http://export.arxiv.org/api/query".to_string(),
            source_url: "https://arxiv.org/e-print/".to_string(),
            delay: Duration::from_secs(3),
            batch_size: 100,
        }
    }
}

// -- Atom feed (wire shape) --------------------------------------------------

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    published: String,
    #[serde(default)]
    updated: String,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "arxiv:journal_ref", alias = "journal_ref", default)]
    journal_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    #[serde(default)]
    name: String,
}

// -- Validated entry ---------------------------------------------------------

/// One paper entry from the Atom feed, validated at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ArxivEntry {
    pub paper_id: PaperId,
    /// Version number from the entry id (`.../abs/2402.10011v2` → 2)
    pub version: Option<u32>,
    pub title: String,
    pub authors: Vec<String>,
    pub published: String,
    pub updated: String,
    pub journal_ref: Option<String>,
}

impl ArxivEntry {
    /// Canonical version tag, falling back to `fallback` when the id has none.
    pub fn version_tag(&self, fallback: u32) -> String {
        format!("v{}", self.version.unwrap_or(fallback))
    }

    pub fn to_metadata(&self) -> PaperMetadata {
        let submission_date = normalize_timestamp(&self.published);
        let mut revised_dates = Vec::new();
        if !self.updated.is_empty() && self.updated != self.published {
            revised_dates.push(normalize_timestamp(&self.updated));
        }
        PaperMetadata::new(
            self.title.clone(),
            self.authors.clone(),
            submission_date,
            revised_dates,
            self.journal_ref.clone(),
        )
    }
}

/// Parse an Atom response into validated entries.
///
/// Error entries and entries whose id is not a new-style arXiv id are dropped.
pub fn parse_feed(xml: &str) -> Result<Vec<ArxivEntry>, FetchError> {
    let feed: Feed = quick_xml::de::from_str(xml)
        .map_err(|e| FetchError::Parse(format!("Atom feed: {e}")))?;

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|e| {
            if e.id.is_empty() || e.id.contains(API_ERROR_MARKER) {
                log::debug!("Dropping error entry {:?}: {}", e.id, collapse_ws(&e.title));
                return None;
            }
            let tail = e.id.rsplit('/').next().unwrap_or_default();
            let (_, version) = split_version(tail);
            let paper_id: PaperId = match tail.parse() {
                Ok(id) => id,
                Err(err) => {
                    log::debug!("Dropping entry: {err}");
                    return None;
                }
            };
            Some(ArxivEntry {
                paper_id,
                version,
                title: collapse_ws(&e.title),
                authors: e
                    .authors
                    .into_iter()
                    .map(|a| a.name.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect(),
                published: e.published.trim().to_string(),
                updated: e.updated.trim().to_string(),
                journal_ref: e.journal_ref.map(|j| collapse_ws(&j)).filter(|j| !j.is_empty()),
            })
        })
        .collect())
}

/// Atom titles wrap across lines; fold all whitespace runs into one space
fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `2024-02-15T18:59:59Z` → `2024-02-15T18:59:59+00:00`; unparseable input is kept
fn normalize_timestamp(s: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|_| s.to_string())
}

// -- Client ------------------------------------------------------------------

/// Blocking arXiv client shared by all workers.
pub struct ArxivClient {
    config: ArxivConfig,
    throttle: Throttle,
    telemetry: Option<SharedTelemetry>,
}

impl ArxivClient {
    pub fn new(config: ArxivConfig, telemetry: Option<SharedTelemetry>) -> Self {
        let throttle = Throttle::new(config.delay);
        Self {
            config,
            throttle,
            telemetry,
        }
    }

    /// Look up one exact versioned id (`2402.10011v2`).
    ///
    /// `Ok(None)` means arXiv has no such version.
    pub fn lookup_version(&self, versioned_id: &str) -> Result<Option<ArxivEntry>, FetchError> {
        let url = format!(
            "{}?id_list={versioned_id}&max_results=1",
            self.config.api_url
        );
        let entries = self.query(&url, versioned_id)?;
        Ok(entries.into_iter().next())
    }

    /// Download the e-print for `versioned_id` into `save_dir`.
    ///
    /// The file is named `<versioned_id>.tar.gz` whatever its real content;
    /// classification happens later from the bytes.
    pub fn download_source(&self, versioned_id: &str, save_dir: &Path) -> Result<PathBuf, FetchError> {
        std::fs::create_dir_all(save_dir)?;
        let url = format!("{}{versioned_id}", self.config.source_url);
        let dest = save_dir.join(format!("{versioned_id}.tar.gz"));

        let bytes = retry_with_backoff(versioned_id, || {
            let start = Instant::now();
            let result = download_to_file(&url, &dest);
            self.record_network(start.elapsed());
            result
        })?;
        log::debug!("{versioned_id}: downloaded {bytes} bytes");
        Ok(dest)
    }

    /// Fetch metadata for up to `batch_size` ids in one query.
    pub fn batch_metadata(&self, ids: &[PaperId]) -> Result<Vec<(PaperId, PaperMetadata)>, FetchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_list = ids.iter().map(PaperId::as_str).collect::<Vec<_>>().join(",");
        let url = format!(
            "{}?id_list={id_list}&max_results={}",
            self.config.api_url,
            ids.len()
        );
        let label = format!("metadata batch of {}", ids.len());
        let entries = self.query(&url, &label)?;
        Ok(entries
            .into_iter()
            .map(|e| {
                let meta = e.to_metadata();
                (e.paper_id, meta)
            })
            .collect())
    }

    fn query(&self, url: &str, label: &str) -> Result<Vec<ArxivEntry>, FetchError> {
        let body = retry_with_backoff(label, || {
            self.throttle.wait();
            let start = Instant::now();
            let result = get_text(url, &[]);
            self.record_network(start.elapsed());
            result
        })?;
        parse_feed(&body)
    }

    fn record_network(&self, elapsed: Duration) {
        if let Some(t) = &self.telemetry {
            t.record_network(elapsed);
        }
    }
}

impl crate::metadata::MetadataSource for ArxivClient {
    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    fn batch_metadata(&self, ids: &[PaperId]) -> Result<Vec<(PaperId, PaperMetadata)>, FetchError> {
        ArxivClient::batch_metadata(self, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: id_list=2402.10011v2</title>
  <id>http://arxiv.org/api/abc</id>
  <updated>2024-03-01T00:00:00-05:00</updated>
  <entry>
    <id>http://arxiv.org/abs/2402.10011v2</id>
    <updated>2024-02-20T10:00:00Z</updated>
    <published>2024-02-15T18:59:59Z</published>
    <title>A Study of
      Things</title>
    <summary>Abstract.</summary>
    <author><name> Jürgen Schmidhuber </name></author>
    <author><name>Ada Lovelace</name></author>
    <arxiv:journal_ref>J. Things 1 (2024)</arxiv:journal_ref>
    <link href="http://arxiv.org/abs/2402.10011v2" rel="alternate" type="text/html"/>
  </entry>
</feed>"#;

    const ERROR_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_bogus</id>
    <title>Error</title>
    <summary>incorrect id format for bogus</summary>
  </entry>
</feed>"#;

    const EMPTY_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query</title>
</feed>"#;

    #[test]
    fn parses_entry() {
        let entries = parse_feed(FEED).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.paper_id.as_str(), "2402.10011");
        assert_eq!(e.version, Some(2));
        assert_eq!(e.version_tag(1), "v2");
        assert_eq!(e.title, "A Study of Things");
        assert_eq!(e.authors, vec!["Jürgen Schmidhuber", "Ada Lovelace"]);
    }

    #[test]
    fn entry_to_metadata() {
        let meta = parse_feed(FEED).unwrap()[0].to_metadata();
        assert_eq!(meta.submission_date, "2024-02-15T18:59:59+00:00");
        assert_eq!(meta.revised_dates, vec!["2024-02-20T10:00:00+00:00"]);
    }

    #[test]
    fn error_entry_is_not_found() {
        assert!(parse_feed(ERROR_FEED).unwrap().is_empty());
    }

    #[test]
    fn empty_feed_is_not_found() {
        assert!(parse_feed(EMPTY_FEED).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_parse_error() {
        let err = parse_feed("<feed><entry><id>").unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn version_tag_falls_back() {
        let mut e = parse_feed(FEED).unwrap().remove(0);
        e.version = None;
        assert_eq!(e.version_tag(4), "v4");
    }

    /// Hits the live API: `cargo test -p arxline-arxiv -- --ignored`
    #[test]
    #[ignore]
    fn live_lookup() {
        let client = ArxivClient::new(ArxivConfig::default(), None);
        let entry = client.lookup_version("1706.03762v1").unwrap().unwrap();
        assert_eq!(entry.paper_id.as_str(), "1706.03762");
        assert!(client.lookup_version("1706.03762v99").unwrap().is_none());
    }
}
