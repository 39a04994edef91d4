//! Retry with exponential backoff for remote calls

use std::time::Duration;

use crate::error::FetchError;
use crate::stream::{StreamError, http_config};

/// Errors that know whether repeating the call could help
pub trait Retryable: std::fmt::Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StreamError {
    fn is_retryable(&self) -> bool {
        StreamError::is_retryable(self)
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        FetchError::is_retryable(self)
    }
}

/// Exponential backoff: 2^attempt seconds (2s, 4s, 8s, ...)
pub const fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt))
}

/// Retry a fallible remote operation with exponential backoff.
///
/// On retryable errors, logs the failure, sleeps, and retries up to
/// `max_retries` (from the global [`HttpConfig`](crate::stream::HttpConfig)).
///
/// Returns `Ok(T)` on first success, or the final `Err` on exhaustion / non-retryable error.
pub fn retry_with_backoff<T, E: Retryable>(
    label: &str,
    attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    retry_with(label, http_config().max_retries, backoff_duration, attempt_fn)
}

/// [`retry_with_backoff`] with an explicit retry budget and backoff schedule
pub fn retry_with<T, E: Retryable>(
    label: &str,
    max_retries: u32,
    backoff: impl Fn(u32) -> Duration,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                log::debug!("{label}: attempt {attempt}/{max_retries} failed: {e}, retrying...");
                std::thread::sleep(backoff(attempt));
            }
            Err(e) => {
                log::debug!("{label}: giving up: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_err(status: u16) -> FetchError {
        FetchError::Stream(StreamError::Http {
            status: Some(status),
            message: "test".to_string(),
        })
    }

    #[test]
    fn backoff_exponential() {
        assert_eq!(backoff_duration(1), Duration::from_secs(2));
        assert_eq!(backoff_duration(2), Duration::from_secs(4));
        assert_eq!(backoff_duration(3), Duration::from_secs(8));
    }

    #[test]
    fn retries_transient_until_success() {
        let mut calls = 0;
        let result = retry_with("t", 3, |_| Duration::ZERO, || {
            calls += 1;
            if calls < 3 { Err(http_err(503)) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn stops_on_permanent_error() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with("t", 5, |_| Duration::ZERO, || {
            calls += 1;
            Err(http_err(404))
        });
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls, 1);
    }

    #[test]
    fn gives_up_after_budget() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with("t", 2, |_| Duration::ZERO, || {
            calls += 1;
            Err(http_err(500))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
