//! Dropbox API Error Types
//!
//! Maps HTTP status codes and transport failures to variants the sync loop
//! and the document source can act on (retry, surface as 404, give up).

use serde::Deserialize;

/// Error body Dropbox returns alongside 409 responses
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_summary: String,
}

/// Dropbox API error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum DropboxError {
    #[error("Access token rejected: {0}")]
    Unauthorized(String),

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request rejected ({0}): {1}")]
    Request(u16, String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl DropboxError {
    /// Whether this error is worth retrying within the same call
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DropboxError::RateLimited
                | DropboxError::Timeout
                | DropboxError::Network(_)
                | DropboxError::Server(_, _)
        )
    }

    /// Create a DropboxError from an HTTP status code and response body
    ///
    /// Dropbox reports missing paths as a 409 with a `path/not_found`
    /// summary rather than a 404.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => DropboxError::Unauthorized(body.to_string()),
            404 => DropboxError::NotFound(body.to_string()),
            408 => DropboxError::Timeout,
            409 if is_missing_path(body) => DropboxError::NotFound(body.to_string()),
            429 => DropboxError::RateLimited,
            500..=599 => DropboxError::Server(status, body.to_string()),
            _ => DropboxError::Request(status, body.to_string()),
        }
    }
}

/// Whether a 409 body reports a missing path (`path/not_found/...`)
fn is_missing_path(body: &str) -> bool {
    serde_json::from_str::<ErrorBody>(body)
        .is_ok_and(|parsed| parsed.error_summary.starts_with("path/not_found"))
}

impl From<reqwest::Error> for DropboxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DropboxError::Timeout
        } else if err.is_decode() {
            DropboxError::Decode(err.to_string())
        } else {
            DropboxError::Network(err.to_string())
        }
    }
}
