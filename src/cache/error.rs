//! Cache Error Types

/// Failures of a cache backend
///
/// Reads never surface these to callers; the cache fails open and goes to
/// the source instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Backend(String),

    #[error("Cache value encoding failed: {0}")]
    Encoding(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Encoding(err.to_string())
    }
}
