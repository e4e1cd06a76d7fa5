//! Two-tier store: a local moka tier in front of a shared Redis tier
//!
//! Several server instances share the Redis tier, so an invalidation applied
//! by one instance reaches the others once their local copy expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::error::CacheError;
use super::store::{CacheStore, CacheValue, LocalStore};

/// Default lifetime of a local copy in two-tier mode
pub const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(60);

/// Byte-oriented cache shared between instances
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Redis-backed shared tier
///
/// The connection manager reconnects on its own after a dropped connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `redis://[:password@]host[:port]`
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to shared Redis cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// Local tier in front of a shared tier
///
/// Values are JSON in the shared tier. Reads prefer the local tier; a shared
/// hit is copied into it. Writes and deletes go to both tiers, local first,
/// so a shared outage still leaves this instance with a working cache.
pub struct TwoTierStore {
    local: LocalStore,
    shared: Arc<dyn SharedStore>,
}

impl TwoTierStore {
    pub fn new(local: LocalStore, shared: Arc<dyn SharedStore>) -> Self {
        Self { local, shared }
    }
}

#[async_trait]
impl CacheStore for TwoTierStore {
    fn name(&self) -> &'static str {
        "two-tier"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError> {
        if let Some(value) = self.local.get(key).await? {
            return Ok(Some(value));
        }

        let Some(bytes) = self.shared.get(key).await? else {
            return Ok(None);
        };
        let value: CacheValue = serde_json::from_slice(&bytes)?;
        debug!(key = key, "Shared cache hit, copying to local tier");
        self.local.set(key, value.clone()).await?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(&value)?;
        self.local.set(key, value).await?;
        self.shared.set(key, bytes).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.local.delete(key).await?;
        self.shared.delete(key).await
    }
}
