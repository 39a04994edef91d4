//! Owner → arXiv identifier range, read from the assignments CSV.
//!
//! Columns: `MSSV,start_month,start_id,end_month,end_id` where months are
//! `YYYY-MM` and ids are integer sequence numbers within the month.

use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::id::PaperId;

/// Upper bound on generated identifiers per owner
pub const MAX_GENERATED_IDS: usize = 10_000;

/// Last sequence number tried for months strictly inside the range
const MONTH_LAST_SEQ: u32 = 99_999;

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "MSSV")]
    owner: String,
    start_month: String,
    start_id: String,
    end_month: String,
    end_id: String,
}

/// One owner's assigned identifier range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub owner: String,
    pub start: (i32, u32),
    pub start_id: u32,
    pub end: (i32, u32),
    pub end_id: u32,
}

impl Assignment {
    /// Find `owner` in the CSV at `path`.
    pub fn lookup(path: &Path, owner: &str) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
        Self::from_bytes(&bytes, owner)
            .with_context(|| format!("Assignment lookup in {}", path.display()))
    }

    /// Find `owner` in raw CSV bytes (UTF-8 with optional BOM, else Latin-1).
    pub fn from_bytes(bytes: &[u8], owner: &str) -> anyhow::Result<Self> {
        let text = decode_text(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(text.as_bytes());

        for row in reader.deserialize::<Row>() {
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    log::debug!("Skipping malformed assignment row: {e}");
                    continue;
                }
            };
            if row.owner != owner {
                continue;
            }
            return Ok(Self {
                owner: row.owner,
                start: parse_month(&row.start_month)?,
                start_id: row
                    .start_id
                    .parse()
                    .with_context(|| format!("Bad start_id {:?}", row.start_id))?,
                end: parse_month(&row.end_month)?,
                end_id: row
                    .end_id
                    .parse()
                    .with_context(|| format!("Bad end_id {:?}", row.end_id))?,
            });
        }
        bail!("Owner {owner} not found in assignments")
    }

    /// Enumerate every identifier in the range, month by month.
    ///
    /// The first month starts at `start_id`, the last ends at `end_id`, and
    /// months in between cover `0..=99999`. Stops at [`MAX_GENERATED_IDS`].
    pub fn paper_ids(&self) -> Vec<PaperId> {
        let mut ids = Vec::new();
        let (mut year, mut month) = self.start;

        while (year, month) <= self.end {
            let first = if (year, month) == self.start {
                self.start_id
            } else {
                0
            };
            let last = if (year, month) == self.end {
                self.end_id
            } else {
                MONTH_LAST_SEQ
            };
            for seq in first..=last {
                if ids.len() >= MAX_GENERATED_IDS {
                    log::warn!("Generated {MAX_GENERATED_IDS} IDs, stopping");
                    return ids;
                }
                ids.push(PaperId::from_parts(year, month, seq));
            }
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }
        log::info!("Generated {} paper IDs", ids.len());
        ids
    }
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn parse_month(s: &str) -> anyhow::Result<(i32, u32)> {
    let (y, m) = s
        .split_once('-')
        .with_context(|| format!("Month {s:?} is not YYYY-MM"))?;
    let year: i32 = y.parse().with_context(|| format!("Bad year in {s:?}"))?;
    let month: u32 = m.parse().with_context(|| format!("Bad month in {s:?}"))?;
    if !(1..=12).contains(&month) {
        bail!("Month out of range in {s:?}");
    }
    Ok((year, month))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "MSSV,start_month,start_id,end_month,end_id\n\
        23127001,2024-02,10011,2024-02,10020\n\
        23127002,2023-12,99998,2024-01,00002\n";

    #[test]
    fn lookup_finds_owner() {
        let a = Assignment::from_bytes(CSV.as_bytes(), "23127001").unwrap();
        assert_eq!(a.start, (2024, 2));
        assert_eq!(a.start_id, 10011);
        assert_eq!(a.end_id, 10020);
    }

    #[test]
    fn lookup_unknown_owner_errors() {
        let err = Assignment::from_bytes(CSV.as_bytes(), "nobody").unwrap_err();
        assert!(err.to_string().contains("nobody"));
    }

    #[test]
    fn bom_is_stripped() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(CSV.as_bytes());
        assert!(Assignment::from_bytes(&bytes, "23127001").is_ok());
    }

    #[test]
    fn latin1_fallback() {
        let mut bytes = b"MSSV,start_month,start_id,end_month,end_id,note\n".to_vec();
        bytes.extend_from_slice(b"23127001,2024-02,1,2024-02,3,caf\xE9\n");
        let a = Assignment::from_bytes(&bytes, "23127001").unwrap();
        assert_eq!(a.paper_ids().len(), 3);
    }

    #[test]
    fn ids_within_one_month() {
        let a = Assignment::from_bytes(CSV.as_bytes(), "23127001").unwrap();
        let ids = a.paper_ids();
        assert_eq!(ids.len(), 10);
        assert_eq!(ids[0].as_str(), "2402.10011");
        assert_eq!(ids[9].as_str(), "2402.10020");
    }

    #[test]
    fn ids_cross_year_boundary() {
        let a = Assignment::from_bytes(CSV.as_bytes(), "23127002").unwrap();
        let ids: Vec<String> = a.paper_ids().iter().map(|i| i.to_string()).collect();
        assert_eq!(
            ids,
            vec!["2312.99998", "2312.99999", "2401.00000", "2401.00001", "2401.00002"]
        );
    }

    #[test]
    fn ids_are_capped() {
        let a = Assignment {
            owner: "x".into(),
            start: (2024, 1),
            start_id: 0,
            end: (2024, 3),
            end_id: 5,
        };
        assert_eq!(a.paper_ids().len(), MAX_GENERATED_IDS);
    }
}
