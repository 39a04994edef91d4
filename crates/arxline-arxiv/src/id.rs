//! arXiv identifiers: `YYMM.NNNNN` with an optional `vN` suffix

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier that failed to parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidId(pub String);

impl fmt::Display for InvalidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid arXiv id: {:?}", self.0)
    }
}

impl std::error::Error for InvalidId {}

/// Base (unversioned) arXiv identifier, e.g. `2402.10011`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperId(String);

impl PaperId {
    /// Build from a calendar month and sequence number.
    ///
    /// The year keeps its last two digits; the sequence is zero-padded to five.
    pub fn from_parts(year: i32, month: u32, seq: u32) -> Self {
        Self(format!("{:02}{:02}.{:05}", year.rem_euclid(100), month, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name used under the data root (`2402.10011` → `2402-10011`)
    pub fn folder_name(&self) -> String {
        self.0.replace('.', "-")
    }

    /// `2402.10011` + 3 → `2402.10011v3`
    pub fn versioned(&self, version: u32) -> String {
        format!("{}v{version}", self.0)
    }
}

impl FromStr for PaperId {
    type Err = InvalidId;

    /// Accepts `YYMM.NNNN` or `YYMM.NNNNN`; a trailing `vN` is stripped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (base, _) = split_version(trimmed);
        let invalid = || InvalidId(s.to_string());

        let (yymm, seq) = base.split_once('.').ok_or_else(invalid)?;
        if yymm.len() != 4 || !yymm.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !(4..=5).contains(&seq.len()) || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let month: u32 = yymm[2..].parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self(base.to_string()))
    }
}

impl TryFrom<String> for PaperId {
    type Error = InvalidId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PaperId> for String {
    fn from(id: PaperId) -> Self {
        id.0
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a trailing `vN` suffix: `"2402.10011v3"` → `("2402.10011", Some(3))`.
pub fn split_version(s: &str) -> (&str, Option<u32>) {
    if let Some(pos) = s.rfind('v') {
        if let Some(n) = parse_version_tag(&s[pos..]) {
            return (&s[..pos], Some(n));
        }
    }
    (s, None)
}

/// Parse a version tag (`"v2"` → `2`). Tags start at `v1`.
pub fn parse_version_tag(tag: &str) -> Option<u32> {
    let digits = tag.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n >= 1)
}
