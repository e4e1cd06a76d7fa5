//! Document sources
//!
//! `DocumentSource` is the read contract shared by the uncached remote source
//! and every cache backend, so callers never care which one is mounted.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::error::BlogError;
use super::frontmatter;
use super::types::{is_published, Document, DocumentMeta};
use crate::dropbox::RemoteContent;

/// Read access to posts
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// A single post by id
    async fn get_document(&self, id: &str) -> Result<Document, BlogError>;

    /// Every published post, newest first
    async fn get_meta_list(&self) -> Result<Vec<DocumentMeta>, BlogError>;
}

/// Reads posts straight from the content store
pub struct RemoteDocumentSource<C> {
    client: Arc<C>,
}

impl<C: RemoteContent> RemoteDocumentSource<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: RemoteContent> DocumentSource for RemoteDocumentSource<C> {
    async fn get_document(&self, id: &str) -> Result<Document, BlogError> {
        let (content, entry) = self.client.get_content(id).await?;
        let (front, body_start) = frontmatter::parse(&content)?;

        debug!(id = id, title = %front.title, "Loaded document from content store");
        Ok(Document {
            meta: DocumentMeta {
                id: self.client.derive_id(&entry),
                title: front.title,
                published: front.published,
                updated: entry.modified,
            },
            content: frontmatter::body(&content, body_start),
        })
    }

    /// Built from the synced properties alone; nothing is downloaded.
    async fn get_meta_list(&self) -> Result<Vec<DocumentMeta>, BlogError> {
        let entries = self.client.list_collection().await?;
        let listed = entries.len();

        let mut metas: Vec<DocumentMeta> = entries
            .into_iter()
            .filter_map(|entry| {
                let id = self.client.derive_id(&entry);
                let props = entry.properties?;
                let Some(published) = props.published.filter(is_published) else {
                    trace!(id = %id, "Skipping unsynced or draft document");
                    return None;
                };
                Some(DocumentMeta {
                    id,
                    title: props.title,
                    published,
                    updated: entry.modified,
                })
            })
            .collect();
        metas.sort_by(|a, b| b.published.cmp(&a.published).then_with(|| a.id.cmp(&b.id)));

        debug!(listed = listed, published = metas.len(), "Built document listing");
        Ok(metas)
    }
}
