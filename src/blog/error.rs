//! Blog Error Types

use crate::dropbox::DropboxError;

/// Errors surfaced by document reads and the sync loop
#[derive(Debug, Clone, thiserror::Error)]
pub enum BlogError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Content provider error: {0}")]
    Provider(#[source] DropboxError),

    #[error("Malformed front matter: {0}")]
    MalformedMetadata(String),

    #[error("Fetch interrupted: {0}")]
    Interrupted(String),
}

impl BlogError {
    /// Whether callers should report this as a missing document
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlogError::NotFound(_))
    }
}

impl From<DropboxError> for BlogError {
    fn from(err: DropboxError) -> Self {
        match err {
            DropboxError::NotFound(detail) => BlogError::NotFound(detail),
            other => BlogError::Provider(other),
        }
    }
}
