//! Change detection
//!
//! Dropbox offers no push notifications usable here, so the sync loop polls
//! the folder listing. Each document carries the content hash its properties
//! were extracted from; when the live hash differs, the document is
//! downloaded, its front matter re-read, the properties rewritten and a
//! change event emitted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::BlogError;
use super::frontmatter;
use super::types::ChangeEvent;
use crate::dropbox::{RemoteContent, RemoteEntry, RemoteProperties};
use crate::shutdown::Shutdown;

/// Outcome of one polling pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub listed: usize,
    pub unchanged: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Polls the content store and rewrites stale document properties
///
/// This is the only writer of document properties.
pub struct SyncLoop<C> {
    client: Arc<C>,
    events: mpsc::Sender<ChangeEvent>,
    interval: Duration,
}

impl<C: RemoteContent> SyncLoop<C> {
    pub fn new(client: Arc<C>, events: mpsc::Sender<ChangeEvent>, interval: Duration) -> Self {
        Self {
            client,
            events,
            interval,
        }
    }

    /// Poll until shutdown is signalled
    ///
    /// The first pass starts immediately. A pass interrupted by shutdown is
    /// abandoned mid-flight; entries it did not finish keep their stale hash
    /// and are picked up by the next run.
    pub async fn run(self, mut shutdown: Shutdown) {
        info!(interval_secs = self.interval.as_secs(), "Sync loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.poll_once() => match result {
                    Ok(report) if report.refreshed > 0 || report.failed > 0 => {
                        info!(
                            listed = report.listed,
                            refreshed = report.refreshed,
                            failed = report.failed,
                            "Sync pass finished"
                        );
                    }
                    Ok(report) => {
                        debug!(listed = report.listed, "Sync pass found no changes");
                    }
                    Err(e) => {
                        warn!(error = %e, "Listing documents failed, retrying next cycle");
                    }
                },
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Sync loop stopped");
    }

    /// List once and refresh every entry whose stored hash is stale
    ///
    /// Per-entry failures are logged and counted; only a failed listing is
    /// returned as an error.
    pub async fn poll_once(&self) -> Result<SyncReport, BlogError> {
        let entries = self.client.list_collection().await?;
        let mut report = SyncReport {
            listed: entries.len(),
            ..SyncReport::default()
        };

        for entry in &entries {
            if entry.stored_hash() == entry.content_hash {
                report.unchanged += 1;
                continue;
            }

            let id = self.client.derive_id(entry);
            debug!(id = %id, stored = entry.stored_hash(), live = %entry.content_hash, "Document changed");

            match self.refresh(&id, entry).await {
                Ok(()) => {
                    report.refreshed += 1;
                    // Properties are written before the event goes out, so an
                    // invalidation never races a refetch of the old revision.
                    if self.events.send(ChangeEvent { id: id.clone() }).await.is_err() {
                        warn!(id = %id, "Change event dropped, no listener");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(id = %id, error = %e, "Refreshing document properties failed");
                }
            }
        }

        Ok(report)
    }

    async fn refresh(&self, id: &str, entry: &RemoteEntry) -> Result<(), BlogError> {
        let (content, current) = self.client.get_content(id).await?;
        let (front, _) = frontmatter::parse(&content)?;

        // Record the hash of the bytes actually parsed; if the file moved on
        // since the listing the next pass catches up.
        let hash = if current.content_hash.is_empty() {
            entry.content_hash.clone()
        } else {
            current.content_hash
        };
        let props = RemoteProperties {
            title: front.title,
            published: Some(front.published),
            hash,
        };
        self.client.set_properties(entry, &props).await?;
        Ok(())
    }
}
