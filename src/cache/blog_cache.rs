//! Read-through blog cache
//!
//! `BlogCache` wraps a [`DocumentSource`] and serves reads from a
//! [`CacheStore`]. On a miss exactly one upstream fetch runs per key; every
//! concurrent caller for that key awaits the same shared future.
//!
//! Invalidation bumps a global epoch. A fetch only writes its result into the
//! store if no invalidation happened since it started, and removes what it
//! wrote if one landed during the write. This keeps a fetch that raced an
//! invalidation from re-caching the revision that was just invalidated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace, warn};

use super::error::CacheError;
use super::store::{post_key, CacheStore, CacheValue, POSTS_META_KEY};
use crate::blog::{BlogError, Document, DocumentMeta, DocumentSource};

/// Read contract plus invalidation
#[async_trait]
pub trait CacheLayer: DocumentSource {
    /// Drop the cached post and the cached listing
    ///
    /// Invalidating an id that was never cached is a no-op.
    async fn invalidate(&self, id: &str) -> Result<(), CacheError>;
}

/// Counters exposed for periodic logging
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub in_flight: usize,
}

type Flight<T> = Shared<BoxFuture<'static, Result<T, BlogError>>>;

/// In-flight fetches keyed by cache key
struct FlightMap<T> {
    next_id: AtomicU64,
    flights: Mutex<HashMap<String, (u64, Flight<T>)>>,
}

impl<T: Clone + Send + Sync + 'static> FlightMap<T> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            flights: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (u64, Flight<T>)>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the fetch for `key`, starting one if none is running
    ///
    /// The fetch runs on its own task, so it completes and leaves the map
    /// even when every caller awaiting it is dropped.
    fn join<F>(&self, key: &str, start: F) -> Flight<T>
    where
        F: FnOnce(u64) -> BoxFuture<'static, Result<T, BlogError>>,
    {
        let mut flights = self.lock();
        if let Some((_, flight)) = flights.get(key) {
            trace!(key = key, "Joining in-flight fetch");
            return flight.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(start(id));
        let flight = async move {
            task.await
                .unwrap_or_else(|e| Err(BlogError::Interrupted(e.to_string())))
        }
        .boxed()
        .shared();
        flights.insert(key.to_string(), (id, flight.clone()));
        flight
    }

    /// Remove a finished fetch unless a newer one replaced it
    fn finish(&self, key: &str, id: u64) {
        let mut flights = self.lock();
        if flights.get(key).is_some_and(|(current, _)| *current == id) {
            flights.remove(key);
        }
    }

    /// Detach the fetch for `key` so later callers start a fresh one
    fn forget(&self, key: &str) {
        self.lock().remove(key);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Values the cache knows how to store and fetch
trait Cacheable: Clone + Send + Sync + Sized + 'static {
    fn into_value(self) -> CacheValue;

    fn from_value(value: CacheValue) -> Option<Self>;

    fn flights(inner: &Inner) -> &FlightMap<Self>;
}

impl Cacheable for Document {
    fn into_value(self) -> CacheValue {
        CacheValue::Post(self)
    }

    fn from_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::Post(doc) => Some(doc),
            CacheValue::PostsMeta(_) => None,
        }
    }

    fn flights(inner: &Inner) -> &FlightMap<Self> {
        &inner.documents
    }
}

impl Cacheable for Vec<DocumentMeta> {
    fn into_value(self) -> CacheValue {
        CacheValue::PostsMeta(self)
    }

    fn from_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::PostsMeta(metas) => Some(metas),
            CacheValue::Post(_) => None,
        }
    }

    fn flights(inner: &Inner) -> &FlightMap<Self> {
        &inner.listing
    }
}

struct Inner {
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn CacheStore>,
    documents: FlightMap<Document>,
    listing: FlightMap<Vec<DocumentMeta>>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Inner {
    /// Write a fetched value unless an invalidation intervened
    async fn populate(&self, key: &str, value: CacheValue, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(key = key, "Invalidated during fetch, not caching");
            return;
        }

        if let Err(e) = self.store.set(key, value).await {
            warn!(key = key, store = self.store.name(), error = %e, "Cache write failed");
            return;
        }

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(key = key, "Invalidated during cache write, removing");
            if let Err(e) = self.store.delete(key).await {
                warn!(key = key, store = self.store.name(), error = %e, "Cache delete failed");
            }
        }
    }
}

/// Cache-aside wrapper over a document source
///
/// Cheap to clone; clones share the store and the in-flight fetches.
#[derive(Clone)]
pub struct BlogCache {
    inner: Arc<Inner>,
}

impl BlogCache {
    pub fn new(source: Arc<dyn DocumentSource>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                store,
                documents: FlightMap::new(),
                listing: FlightMap::new(),
                epoch: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn store_name(&self) -> &'static str {
        self.inner.store.name()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            in_flight: self.inner.documents.len() + self.inner.listing.len(),
        }
    }

    /// Serve `key` from the store, or from the shared fetch `load` feeds
    ///
    /// Store errors are treated as misses.
    async fn read_through<T: Cacheable>(
        &self,
        key: String,
        load: BoxFuture<'static, Result<T, BlogError>>,
    ) -> Result<T, BlogError> {
        match self.inner.store.get(&key).await {
            Ok(Some(value)) => match T::from_value(value) {
                Some(hit) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %key, "Cache HIT");
                    return Ok(hit);
                }
                None => warn!(key = %key, "Cached value has the wrong kind, refetching"),
            },
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, store = self.inner.store.name(), error = %e, "Cache read failed, using source");
            }
        }

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "Cache MISS");

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let flight = T::flights(&self.inner).join(&key, |flight_id| {
            let key = key.clone();
            async move {
                let result = load.await;
                if let Ok(value) = &result {
                    inner.populate(&key, value.clone().into_value(), epoch).await;
                }
                T::flights(&inner).finish(&key, flight_id);
                result
            }
            .boxed()
        });
        flight.await
    }
}

#[async_trait]
impl DocumentSource for BlogCache {
    async fn get_document(&self, id: &str) -> Result<Document, BlogError> {
        let source = Arc::clone(&self.inner.source);
        let owned = id.to_string();
        let load = async move { source.get_document(&owned).await }.boxed();
        self.read_through(post_key(id), load).await
    }

    async fn get_meta_list(&self) -> Result<Vec<DocumentMeta>, BlogError> {
        let source = Arc::clone(&self.inner.source);
        let load = async move { source.get_meta_list().await }.boxed();
        self.read_through(POSTS_META_KEY.to_string(), load).await
    }
}

#[async_trait]
impl CacheLayer for BlogCache {
    async fn invalidate(&self, id: &str) -> Result<(), CacheError> {
        let key = post_key(id);

        // Bump first: any fetch that has not written yet will now skip or
        // undo its write.
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.documents.forget(&key);
        self.inner.listing.forget(POSTS_META_KEY);

        let post = self.inner.store.delete(&key).await;
        let listing = self.inner.store.delete(POSTS_META_KEY).await;
        debug!(id = id, store = self.inner.store.name(), "Invalidated cached post and listing");
        post.and(listing)
    }
}
