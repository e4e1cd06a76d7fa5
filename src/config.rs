//! Command line and environment configuration

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::dropbox::client::{DEFAULT_API_URL, DEFAULT_BASE_PATH, DEFAULT_CONTENT_URL};
use crate::dropbox::DropboxSettings;

/// Which cache sits in front of the content store
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackend {
    /// No caching; every read hits Dropbox
    Bypass,
    /// Bounded in-process cache
    Local,
    /// In-process cache backed by Redis
    TwoTier,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "anachrome-sync")]
#[command(about = "Dropbox-backed blog content sync and cache", long_about = None)]
pub struct Config {
    /// Dropbox OAuth access token
    #[arg(long, env = "DROPBOX_KEY", hide_env_values = true)]
    pub dropbox_key: String,

    /// Dropbox folder holding the posts
    #[arg(long, env = "DROPBOX_BASE_PATH", default_value = DEFAULT_BASE_PATH)]
    pub base_path: String,

    /// File properties template id for title/published/hash
    #[arg(long, env = "DROPBOX_TEMPLATE_ID")]
    pub template_id: String,

    #[arg(long, env = "DROPBOX_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    #[arg(long, env = "DROPBOX_CONTENT_URL", default_value = DEFAULT_CONTENT_URL)]
    pub content_url: String,

    /// Cache backend; two-tier requires a Redis host
    #[arg(long, env = "CACHE_BACKEND", value_enum, default_value = "local")]
    pub cache_backend: CacheBackend,

    /// Maximum entries held in process
    #[arg(long, env = "CACHE_CAPACITY", default_value_t = 1000)]
    pub cache_capacity: u64,

    /// Redis host[:port] for the shared cache tier
    #[arg(long, env = "REDIS_HOST")]
    pub redis_host: Option<String>,

    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Seconds between change detection polls
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value_t = 30)]
    pub sync_interval_secs: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the sync loop and cache until interrupted (default)
    Serve,
    /// Run a single change detection pass and exit
    SyncOnce,
    /// Print the published post listing
    List,
    /// Print one post
    Show {
        /// Post id (file name without extension)
        id: String,
    },
}

impl Config {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn dropbox_settings(&self) -> DropboxSettings {
        DropboxSettings {
            token: self.dropbox_key.clone(),
            base_path: self.base_path.clone(),
            template_id: self.template_id.clone(),
            api_url: self.api_url.clone(),
            content_url: self.content_url.clone(),
        }
    }

    /// Connection URL for the shared tier, if a host is configured
    pub fn redis_url(&self) -> Option<String> {
        let host = self.redis_host.as_deref()?.trim();
        if host.is_empty() {
            return None;
        }
        let host = host.strip_prefix("redis://").unwrap_or(host);
        Some(match self.redis_password.as_deref() {
            Some(password) if !password.is_empty() => format!("redis://:{}@{}", password, host),
            _ => format!("redis://{}", host),
        })
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}
