//! Semantic Scholar Graph API client (paper references).
//!
//! One request per paper, paced by a [`Throttle`] and retried with backoff on
//! 429/5xx. A paper the graph does not know (404) simply has no references.

use std::time::{Duration, Instant};

use arxline_core::{FetchError, SharedTelemetry, Throttle, get_text, retry_with_backoff};
use serde::{Deserialize, Serialize};

const REFERENCE_FIELDS: &str = "references.paperId,references.externalIds,references.title,\
references.authors,references.year,references.publicationDate";

#[derive(Debug, Clone)]
pub struct S2Config {
    pub api_url: String,
    /// Sent as `x-api-key` when present
    pub api_key: Option<String>,
    pub delay: Duration,
}

impl Default for S2Config {
    fn default() -> Self {
        Self {
            api_url: "https://api.semanticscholar.org/graph/v1".to_string(),
            api_key: None,
            delay: Duration::from_secs(1),
        }
    }
}

/// One cited paper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub publication_date: Option<String>,
    pub semantic_scholar_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
}

// -- Wire shape --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PaperPayload {
    #[serde(default)]
    references: Option<Vec<RefPayload>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefPayload {
    paper_id: Option<String>,
    external_ids: Option<ExternalIds>,
    title: Option<String>,
    #[serde(default)]
    authors: Option<Vec<AuthorPayload>>,
    year: Option<i32>,
    publication_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorPayload {
    name: Option<String>,
}

impl From<RefPayload> for Reference {
    fn from(r: RefPayload) -> Self {
        Self {
            title: r.title.unwrap_or_default(),
            authors: r
                .authors
                .unwrap_or_default()
                .into_iter()
                .map(|a| a.name.unwrap_or_default())
                .collect(),
            year: r.year,
            publication_date: r.publication_date,
            semantic_scholar_id: r.paper_id.unwrap_or_default(),
            arxiv_id: r.external_ids.and_then(|e| e.arxiv).filter(|s| !s.is_empty()),
        }
    }
}

/// Decode a `/paper/{id}?fields=references...` response body.
pub fn parse_references(body: &str) -> Result<Vec<Reference>, FetchError> {
    let payload: PaperPayload =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;
    Ok(payload
        .references
        .unwrap_or_default()
        .into_iter()
        .map(Reference::from)
        .collect())
}

// -- Client ------------------------------------------------------------------

pub struct S2Client {
    config: S2Config,
    throttle: Throttle,
    telemetry: Option<SharedTelemetry>,
}

impl S2Client {
    pub fn new(config: S2Config, telemetry: Option<SharedTelemetry>) -> Self {
        let throttle = Throttle::new(config.delay);
        Self {
            config,
            throttle,
            telemetry,
        }
    }

    /// References of the arXiv paper `arxiv_id`; empty if the graph has no record.
    pub fn paper_references(&self, arxiv_id: &str) -> Result<Vec<Reference>, FetchError> {
        let url = format!(
            "{}/paper/arXiv:{arxiv_id}?fields={REFERENCE_FIELDS}",
            self.config.api_url
        );
        let headers: Vec<(&str, &str)> = self
            .config
            .api_key
            .as_deref()
            .map(|key| ("x-api-key", key))
            .into_iter()
            .collect();

        let result = retry_with_backoff(arxiv_id, || {
            self.throttle.wait();
            let start = Instant::now();
            let result = get_text(&url, &headers);
            if let Some(t) = &self.telemetry {
                t.record_network(start.elapsed());
            }
            result
        });
        match result {
            Ok(body) => {
                let refs = parse_references(&body)?;
                log::debug!(
                    "{arxiv_id}: {} references ({} on arXiv)",
                    refs.len(),
                    refs.iter().filter(|r| r.arxiv_id.is_some()).count()
                );
                Ok(refs)
            }
            Err(e) if e.is_not_found() => {
                log::warn!("Paper {arxiv_id} not found in Semantic Scholar");
                Ok(Vec::new())
            }
            Err(e) => Err(FetchError::from(e)),
        }
    }
}
