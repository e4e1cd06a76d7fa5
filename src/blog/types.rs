//! Blog document types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Posts published before 2000-01-01T00:00:00Z are drafts
pub const PUBLISHED_EPOCH_SECS: i64 = 946_684_800;

/// Whether a publish date makes a post visible in listings
pub fn is_published(published: &DateTime<Utc>) -> bool {
    published.timestamp() >= PUBLISHED_EPOCH_SECS
}

/// Listing view of a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub title: String,
    pub published: DateTime<Utc>,
    /// Last modification time reported by the content store
    pub updated: DateTime<Utc>,
}

/// A post with its front matter stripped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub meta: DocumentMeta,
    pub content: String,
}

/// Emitted by the sync loop once a post's properties were rewritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub id: String,
}
