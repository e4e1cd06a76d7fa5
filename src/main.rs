//! Anachrome Sync - Dropbox-backed blog content service
//!
//! Keeps Dropbox file properties in step with post front matter and serves
//! posts through a read-through cache that is invalidated on change.

mod blog;
mod cache;
mod config;
mod dropbox;
mod shutdown;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use blog::frontmatter::{self, FrontMatter};
use blog::{ChangeEvent, DocumentSource, RemoteDocumentSource, SyncLoop, SyncReport};
use cache::store::DEFAULT_LOCAL_CAPACITY;
use cache::two_tier::DEFAULT_LOCAL_TTL;
use cache::{
    BlogCache, BypassStore, CacheStore, InvalidationBridge, LocalStore, RedisStore, TwoTierStore,
};
use config::{CacheBackend, Command, Config};
use dropbox::client::build_http_client;
use dropbox::{DropboxClient, RemoteContent};
use shutdown::Shutdown;

/// Change events buffered between the sync loop and the bridge
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How often `serve` logs cache counters
const STATS_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::parse();
    let http_client = build_http_client().context("Failed to build HTTP client")?;
    let client = Arc::new(DropboxClient::new(http_client, config.dropbox_settings()));
    info!(base_path = client.base_path(), "Using Dropbox folder");

    match config.command() {
        Command::Serve => serve(&config, client).await,
        Command::SyncOnce => sync_once(&config, client).await,
        Command::List => list(client).await,
        Command::Show { id } => show(client, &id).await,
    }
}

/// Pick the cache store; two-tier degrades to local when Redis is unusable
async fn build_store(config: &Config) -> Arc<dyn CacheStore> {
    let capacity = if config.cache_capacity == 0 {
        DEFAULT_LOCAL_CAPACITY
    } else {
        config.cache_capacity
    };

    match config.cache_backend {
        CacheBackend::Bypass => Arc::new(BypassStore),
        CacheBackend::Local => Arc::new(LocalStore::new(capacity)),
        CacheBackend::TwoTier => {
            let Some(url) = config.redis_url() else {
                warn!("Two-tier cache requested without REDIS_HOST, using local cache");
                return Arc::new(LocalStore::new(capacity));
            };
            match RedisStore::connect(&url).await {
                Ok(redis) => Arc::new(TwoTierStore::new(
                    LocalStore::with_ttl(capacity, DEFAULT_LOCAL_TTL),
                    Arc::new(redis),
                )),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, using local cache");
                    Arc::new(LocalStore::new(capacity))
                }
            }
        }
    }
}

async fn serve(config: &Config, client: Arc<DropboxClient>) -> Result<()> {
    let source = Arc::new(RemoteDocumentSource::new(Arc::clone(&client)));
    let cache = Arc::new(BlogCache::new(source, build_store(config).await));
    info!(store = cache.store_name(), "Starting blog sync service");

    // A failed priming read is not fatal; the first request retries it.
    match cache.get_meta_list().await {
        Ok(metas) => info!(posts = metas.len(), "Primed post listing"),
        Err(e) => warn!(error = %e, "Priming post listing failed"),
    }

    let (trigger, shutdown) = shutdown::channel();
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let sync = SyncLoop::new(client, events_tx, config.sync_interval());
    let sync_handle = tokio::spawn(sync.run(shutdown.clone()));

    let bridge = InvalidationBridge::new(cache.clone(), events_rx);
    let bridge_handle = tokio::spawn(bridge.run(shutdown.clone()));

    let stats_handle = tokio::spawn(log_stats(Arc::clone(&cache), shutdown));

    info!("Service ready. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Received shutdown signal, stopping background tasks...");
    trigger.trigger();

    let (sync_result, bridge_result, stats_result) =
        tokio::join!(sync_handle, bridge_handle, stats_handle);
    sync_result.context("Sync loop task failed")?;
    let invalidations = bridge_result.context("Invalidation bridge task failed")?;
    stats_result.context("Stats task failed")?;

    info!(invalidations = invalidations, "Shutdown complete.");
    Ok(())
}

async fn log_stats(cache: Arc<BlogCache>, mut shutdown: Shutdown) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(STATS_INTERVAL) => {
                let stats = cache.stats();
                info!(
                    store = cache.store_name(),
                    hits = stats.hits,
                    misses = stats.misses,
                    in_flight = stats.in_flight,
                    "Cache statistics"
                );
            }
        }
    }
}

async fn sync_once(config: &Config, client: Arc<DropboxClient>) -> Result<()> {
    let report = sync_pass(client, config.sync_interval()).await?;
    println!(
        "listed {}, unchanged {}, refreshed {}, failed {}",
        report.listed, report.unchanged, report.refreshed, report.failed
    );
    if report.failed > 0 {
        error!(failed = report.failed, "Some posts could not be refreshed");
    }
    Ok(())
}

/// One change detection pass; events are drained so the pass never blocks
/// on a full channel
async fn sync_pass<C>(client: Arc<C>, interval: Duration) -> Result<SyncReport>
where
    C: RemoteContent + 'static,
{
    let (events_tx, mut events_rx) = mpsc::channel::<ChangeEvent>(EVENT_CHANNEL_CAPACITY);
    let drain = tokio::spawn(async move {
        let mut changed = 0usize;
        while let Some(event) = events_rx.recv().await {
            debug!(id = %event.id, "Post changed");
            changed += 1;
        }
        changed
    });

    let sync = SyncLoop::new(client, events_tx, interval);
    let report = sync.poll_once().await;
    drop(sync);
    let changed = drain.await.context("Event drain task failed")?;
    debug!(changed = changed, "Change events drained");

    report.context("Listing posts failed")
}

async fn list(client: Arc<DropboxClient>) -> Result<()> {
    let source = RemoteDocumentSource::new(client);
    let metas = source
        .get_meta_list()
        .await
        .context("Listing posts failed")?;

    if metas.is_empty() {
        println!("No published posts.");
    } else {
        for meta in metas {
            println!(
                "{}  {}  {}",
                meta.published.format("%Y-%m-%d"),
                meta.id,
                meta.title
            );
        }
    }
    Ok(())
}

async fn show(client: Arc<DropboxClient>, id: &str) -> Result<()> {
    let source = RemoteDocumentSource::new(client);
    let doc = match source.get_document(id).await {
        Ok(doc) => doc,
        Err(e) if e.is_not_found() => anyhow::bail!("No post with id '{}'", id),
        Err(e) => return Err(e).with_context(|| format!("Loading post '{}' failed", id)),
    };

    let front = FrontMatter {
        title: doc.meta.title,
        published: doc.meta.published,
    };
    let rendered = frontmatter::render(&front, &doc.content).context("Rendering post failed")?;
    info!(id = id, updated = %doc.meta.updated.to_rfc3339(), "Loaded post");
    println!("{}", rendered);
    Ok(())
}
