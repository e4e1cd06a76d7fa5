//! Change events to cache invalidations

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::blog_cache::CacheLayer;
use crate::blog::ChangeEvent;
use crate::shutdown::Shutdown;

/// Upper bound on a single invalidation
pub const DEFAULT_INVALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Applies sync loop change events to the cache
///
/// A slow or failing cache only produces warnings; the bridge keeps draining
/// events so the sync loop never stalls on a full channel.
pub struct InvalidationBridge {
    cache: Arc<dyn CacheLayer>,
    events: mpsc::Receiver<ChangeEvent>,
    timeout: Duration,
}

impl InvalidationBridge {
    pub fn new(cache: Arc<dyn CacheLayer>, events: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            cache,
            events,
            timeout: DEFAULT_INVALIDATION_TIMEOUT,
        }
    }

    /// Consume events until shutdown or until every sender is gone
    ///
    /// Returns the number of invalidations that succeeded.
    pub async fn run(mut self, mut shutdown: Shutdown) -> usize {
        let mut applied = 0;

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match tokio::time::timeout(self.timeout, self.cache.invalidate(&event.id)).await {
                Ok(Ok(())) => {
                    applied += 1;
                    debug!(id = %event.id, "Cache invalidated");
                }
                Ok(Err(e)) => {
                    warn!(id = %event.id, error = %e, "Cache invalidation failed");
                }
                Err(_) => {
                    warn!(
                        id = %event.id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Cache invalidation timed out"
                    );
                }
            }
        }

        info!(applied = applied, "Invalidation bridge stopped");
        applied
    }
}
