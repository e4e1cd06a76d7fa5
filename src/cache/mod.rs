//! Blog caching layer
//!
//! Read-through caching of posts and of the post listing over one of three
//! interchangeable stores: bypass, bounded local (moka) or two-tier
//! (moka in front of Redis).

pub mod blog_cache;
pub mod bridge;
pub mod error;
pub mod store;
pub mod two_tier;

pub use blog_cache::BlogCache;
pub use bridge::InvalidationBridge;
pub use store::{BypassStore, CacheStore, LocalStore};
pub use two_tier::{RedisStore, TwoTierStore};
