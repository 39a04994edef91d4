//! Shared HTTP client with a blocking facade for rayon workers.
//!
//! Uses async reqwest internally with `tokio::time::timeout` for stall
//! detection, but presents a sync interface: every worker thread simply
//! blocks on the shared runtime.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use futures_util::StreamExt;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifies the harvester to arXiv and Semantic Scholar
const USER_AGENT: &str = concat!("arxline/", env!("CARGO_PKG_VERSION"));

/// Runtime-tunable HTTP behaviour (config file defaults, CLI overrides)
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    /// No data for this long = stall
    pub read_timeout: Duration,
    /// Retry attempts for transient failures
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

static HTTP_CONFIG: RwLock<HttpConfig> = RwLock::new(HttpConfig {
    read_timeout: Duration::from_secs(30),
    max_retries: 3,
});

/// Install the global HTTP configuration (call once at startup).
pub fn set_http_config(config: HttpConfig) {
    match HTTP_CONFIG.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// Current global HTTP configuration.
pub fn http_config() -> HttpConfig {
    match HTTP_CONFIG.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

/// Error types for stream operations
#[derive(Debug)]
pub enum StreamError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    /// HTTP status code, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            Self::Io(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // 429 and 5xx are transient; any other 4xx will fail identically
            Self::Http {
                status: Some(s), ..
            } => *s == 429 || *s >= 500,
            Self::Http { status: None, .. } => true,
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("HTTP client builder failed ({e}), using defaults");
            reqwest::Client::new()
        })
});

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Blocking GET returning the response body as text.
///
/// `headers` are added verbatim (e.g. `x-api-key`). Non-2xx statuses become
/// [`StreamError::Http`] with the status attached.
pub fn get_text(url: &str, headers: &[(&str, &str)]) -> Result<String, StreamError> {
    let read_timeout = http_config().read_timeout;
    SHARED_RUNTIME.handle().block_on(async {
        let mut req = SHARED_CLIENT.get(url);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let response = req
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StreamError::from_reqwest(&e))?;

        match tokio::time::timeout(read_timeout, response.text()).await {
            Ok(body) => body.map_err(|e| StreamError::from_reqwest(&e)),
            Err(_) => Err(StreamError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("read timeout ({}s with no data)", read_timeout.as_secs()),
            ))),
        }
    })
}

/// Blocking GET streamed into `dest`.
///
/// The body goes to `<dest>.part` first and is renamed over `dest` only after
/// the last chunk arrived, so an interrupted transfer never looks complete.
/// Returns the number of bytes written.
pub fn download_to_file(url: &str, dest: &Path) -> Result<u64, StreamError> {
    let read_timeout = http_config().read_timeout;
    let part = dest.with_extension(
        dest.extension()
            .map(|e| format!("{}.part", e.to_string_lossy()))
            .unwrap_or_else(|| "part".to_string()),
    );

    let result = SHARED_RUNTIME.handle().block_on(async {
        let response = SHARED_CLIENT
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StreamError::from_reqwest(&e))?;

        let mut file = File::create(&part)?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        loop {
            let chunk = match tokio::time::timeout(read_timeout, body.next()).await {
                Ok(Some(chunk)) => chunk.map_err(|e| StreamError::from_reqwest(&e))?,
                Ok(None) => break,
                Err(_) => {
                    return Err(StreamError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("read timeout ({}s with no data)", read_timeout.as_secs()),
                    )));
                }
            };
            file.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        file.sync_all()?;
        Ok::<_, StreamError>(written)
    });

    match result {
        Ok(written) => {
            fs::rename(&part, dest)?;
            Ok(written)
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}
