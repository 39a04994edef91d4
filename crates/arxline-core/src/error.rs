//! Common error type for remote collaborators (arXiv, Semantic Scholar)

use crate::stream::StreamError;

/// Error from one remote operation: lookup, download, or API query.
///
/// Wraps either a network/HTTP error ([`StreamError`]), a local I/O error, or
/// a payload that did not parse into the expected shape.
#[derive(Debug)]
pub enum FetchError {
    Stream(StreamError),
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Stream(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Parse(_) => None,
        }
    }
}

impl From<StreamError> for FetchError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Stream(e) => e.is_retryable(),
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
            // A malformed payload is deterministic; asking again returns the same bytes
            Self::Parse(_) => false,
        }
    }

    /// The remote answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Stream(e) if e.is_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn http_err(status: u16) -> StreamError {
        StreamError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    #[test]
    fn fetch_error_stream_404_not_retryable() {
        let err = FetchError::Stream(http_err(404));
        assert!(!err.is_retryable());
        assert!(err.is_not_found());
    }

    #[test]
    fn fetch_error_stream_500_retryable() {
        let err = FetchError::Stream(http_err(500));
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn fetch_error_io_storage_full_not_retryable() {
        let err = FetchError::Io(std::io::Error::new(ErrorKind::StorageFull, "disk full"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn fetch_error_io_other_retryable() {
        let err = FetchError::Io(std::io::Error::new(ErrorKind::BrokenPipe, "pipe"));
        assert!(err.is_retryable());
    }

    #[test]
    fn fetch_error_parse_not_retryable() {
        let err = FetchError::Parse("bad xml".to_string());
        assert!(!err.is_retryable());
        assert_eq!(format!("{err}"), "parse: bad xml");
    }

    #[test]
    fn fetch_error_display_io() {
        let err = FetchError::Io(std::io::Error::new(ErrorKind::NotFound, "not found"));
        let msg = format!("{err}");
        assert!(msg.contains("IO:"));
    }
}
