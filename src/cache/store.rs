//! Cache store backends
//!
//! A store only keeps values; cache-aside, single-flight and invalidation
//! ordering live in [`BlogCache`](super::BlogCache).

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::error::CacheError;
use crate::blog::{Document, DocumentMeta};

/// Key of the aggregate listing
pub const POSTS_META_KEY: &str = "PostsMeta";

/// Key of a single post
pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

/// A cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CacheValue {
    Post(Document),
    PostsMeta(Vec<DocumentMeta>),
}

/// Key/value backend behind the blog cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError>;

    async fn set(&self, key: &str, value: CacheValue) -> Result<(), CacheError>;

    /// Removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Keeps nothing; every read goes to the source
#[derive(Debug, Default, Clone, Copy)]
pub struct BypassStore;

#[async_trait]
impl CacheStore for BypassStore {
    fn name(&self) -> &'static str {
        "bypass"
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheValue>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: CacheValue) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Default number of entries kept in process
pub const DEFAULT_LOCAL_CAPACITY: u64 = 1000;

/// Bounded in-process store
///
/// Moka admits entries with TinyLFU, so once the store is full a rarely
/// read key may be rejected rather than evicting a popular one.
#[derive(Clone)]
pub struct LocalStore {
    cache: Cache<String, CacheValue>,
}

impl LocalStore {
    /// Entries live until evicted or invalidated
    pub fn new(capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .name("blog_local_cache")
            .build();
        Self { cache }
    }

    /// Entries additionally expire `ttl` after insertion
    pub fn with_ttl(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .name("blog_local_cache")
            .build();
        Self { cache }
    }

    /// Number of live entries after pending evictions are applied
    #[cfg(test)]
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError> {
        let value = self.cache.get(key).await;
        trace!(key = key, hit = value.is_some(), "Local cache lookup");
        Ok(value)
    }

    async fn set(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
        self.cache.insert(key.to_string(), value).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
