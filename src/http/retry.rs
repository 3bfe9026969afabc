//! Retry classification for network operations.
//!
//! Only transient transport problems are retried. Client errors will not
//! succeed on a second attempt and fail immediately. This is download-level
//! behavior; build steps themselves are never retried.

use reqwest::StatusCode;

/// Maximum number of attempts for a network operation.
pub const MAX_RETRIES: usize = 3;

/// Delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Errors that should not be retried.
#[derive(Debug)]
pub enum NonRetryableError {
    /// Resource not found (HTTP 404) — a bad source URL or vanished upstream.
    NotFound(String),
    /// Access forbidden (HTTP 401/403).
    Forbidden(String),
    /// Rate limited (HTTP 429).
    RateLimited(String),
    /// Other client errors that won't succeed on retry.
    ClientError(String),
}

impl std::fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NonRetryableError::NotFound(msg) => write!(f, "Not found: {}", msg),
            NonRetryableError::Forbidden(msg) => write!(f, "Access forbidden: {}", msg),
            NonRetryableError::RateLimited(msg) => {
                write!(f, "Rate limited: {}. Try again later.", msg)
            }
            NonRetryableError::ClientError(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for NonRetryableError {}

/// Map a response error to a non-retryable error where retrying is pointless,
/// and to a plain (retryable) error otherwise.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    if let Some(status) = error.status() {
        let classified = match status {
            StatusCode::NOT_FOUND => Some(NonRetryableError::NotFound(error.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Some(NonRetryableError::Forbidden(error.to_string()))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                Some(NonRetryableError::RateLimited(error.to_string()))
            }
            _ if status.is_client_error() => {
                Some(NonRetryableError::ClientError(error.to_string()))
            }
            _ => None,
        };
        if let Some(non_retryable) = classified {
            return anyhow::Error::from(non_retryable);
        }
    }
    anyhow::Error::from(error)
}
