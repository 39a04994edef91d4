//! arXiv access for the harvester
//!
//! - [`id`]: paper identifiers and version tags
//! - [`assignment`]: owner → identifier range lookup from the assignments CSV
//! - [`api`]: Atom API client (version lookup, source download, batch metadata)
//! - [`metadata`]: metadata stage writing `metadata.json` per paper

pub mod api;
pub mod assignment;
pub mod id;
pub mod metadata;

pub use api::{ArxivClient, ArxivConfig, ArxivEntry};
pub use assignment::Assignment;
pub use id::{InvalidId, PaperId, parse_version_tag, split_version};
pub use metadata::{MetadataSource, MetadataStage, PaperMetadata};
