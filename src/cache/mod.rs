//! Shared cache layer.
//!
//! Everything here sits on one [`KeyValueStore`] reachable by all server
//! instances:
//!
//! - **Response cache**: replayable GET responses keyed by principal and URL
//! - **Statistics cache**: aggregated habit statistics per user
//! - **Rate limiter**: fixed-window request counters per client
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! response_ttl_seconds = 120
//! stats_ttl_seconds = 300
//! max_body_bytes = 1048576
//! ```

mod config;
mod entry;
mod invalidation;
pub mod keys;
pub mod memory;
mod middleware;
pub mod rate_limit;
pub mod redis;
mod store;

pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use invalidation::Invalidator;
pub use memory::MemoryStore;
pub use middleware::{
    CACHE_STATUS_HEADER, CacheOutcome, ResponseCacheState, response_cache_layer,
    should_store_response,
};
pub use rate_limit::{RateDecision, RateLimiter};
pub use redis::RedisStore;
pub use store::{KeyValueStore, KeyValueStoreExt, SCAN_BATCH, StoreError};
