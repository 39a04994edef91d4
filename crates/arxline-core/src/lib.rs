//! Arxline Core - Common infrastructure for the arXiv harvesting pipeline
//!
//! This crate provides the reusable pieces every stage leans on: logging,
//! progress bars, the shutdown flag, the shared HTTP client, retries,
//! throttling, atomic file writes and the telemetry sink.

pub mod atomic;
pub mod error;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod stream;
pub mod telemetry;
pub mod throttle;
pub mod work_queue;

// Re-exports for convenience
pub use atomic::{cleanup_tmp_files, write_atomic, write_json_atomic};
pub use error::FetchError;
pub use logging::{PipelineLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_mib, fmt_num};
pub use retry::{Retryable, retry_with_backoff};
pub use shutdown::{is_shutdown_requested, shutdown_flag, wait_or_abandon};
pub use stream::{
    HttpConfig, SHARED_RUNTIME, StreamError, download_to_file, get_text, http_config,
    set_http_config,
};
pub use telemetry::{Counter, Report, SharedTelemetry, SizeSample, Telemetry};
pub use throttle::Throttle;
pub use work_queue::WorkQueue;
