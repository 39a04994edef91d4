//! Arxline source stage
//!
//! Downloads every available revision of a paper's LaTeX source from arXiv,
//! unpacks whatever container the e-print endpoint returned, and keeps only
//! the `.tex`/`.bib` files under `<data_root>/<folder>/tex/<folder>vN/`.
//!
//! ```no_run
//! use arxline_arxiv::{ArxivClient, ArxivConfig, PaperId};
//! use arxline_core::Telemetry;
//! use arxline_source::{PaperPipeline, SkipCache, SourceConfig};
//!
//! let client = ArxivClient::new(ArxivConfig::default(), None);
//! let cache = SkipCache::load("cache/me_downloaded.json".as_ref());
//! let pipeline = PaperPipeline {
//!     source: &client,
//!     cache: &cache,
//!     data_root: "data".into(),
//!     config: SourceConfig::default(),
//!     telemetry: Telemetry::shared(),
//! };
//! let id: PaperId = "2402.10011".parse().unwrap();
//! println!("{}", pipeline.process(&id));
//! ```

pub mod archive;
pub mod collect;
pub mod config;
pub mod driver;
pub mod fetcher;
pub mod figures;
pub mod inspect;
pub mod layout;
pub mod orchestrator;
mod remote;
pub mod skip_cache;

pub use archive::{ArchiveKind, ExtractError, extract};
pub use collect::{CollectOptions, CollectStats, collect};
pub use config::SourceConfig;
pub use driver::{RunCounts, RunSummary, run_all};
pub use fetcher::{FetchOutcome, FetchedVersion, StopReason, VersionSource, fetch_all_versions};
pub use inspect::{CorpusStats, PaperReport, inspect_paper, scan_corpus, sweep_stale_scratch};
pub use layout::{PLACEHOLDER_FILE, PaperLayout, SCRATCH_DIR, ScratchDir};
pub use orchestrator::{PaperOutcome, PaperPipeline};
pub use skip_cache::SkipCache;
