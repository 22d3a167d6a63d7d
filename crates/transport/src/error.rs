//! Error types for transport operations

use std::time::Duration;

/// Errors from issuing an HTTP request.
///
/// A retryable status that is still failing after the last attempt is not an
/// error: the final response is returned so callers can read its body.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("invalid request: {0}")]
    Build(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;
