//! Semantic Scholar citation graph for the harvester
//!
//! [`S2Client`] asks the Graph API for a paper's references; [`ReferencesStage`]
//! runs it over an owner's papers and writes `references.json` per paper.

pub mod api;
pub mod stage;

pub use api::{Reference, S2Client, S2Config};
pub use stage::{ReferenceSource, ReferencesStage, ReferencesSummary};
