//! Cache configuration.
//!
//! Controls the shared response cache and the statistics cache via the
//! `[cache]` table of `habit-tracker.toml`.

use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_RESPONSE_TTL_SECS: u64 = 120;
const DEFAULT_STATS_TTL_SECS: u64 = 300;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Cache configuration from `habit-tracker.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the response cache middleware.
    pub enabled: bool,
    /// Lifetime of cached list responses, in seconds.
    pub response_ttl_seconds: u64,
    /// Lifetime of cached statistics aggregates, in seconds.
    pub stats_ttl_seconds: u64,
    /// Responses with larger bodies are served but never stored.
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            response_ttl_seconds: DEFAULT_RESPONSE_TTL_SECS,
            stats_ttl_seconds: DEFAULT_STATS_TTL_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            response_ttl_seconds: settings.response_ttl_seconds.get(),
            stats_ttl_seconds: settings.stats_ttl_seconds.get(),
            max_body_bytes: settings.max_body_bytes.get(),
        }
    }
}

impl CacheConfig {
    /// Response TTL, clamped to at least one second.
    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_seconds.max(1))
    }

    /// Statistics TTL, clamped to at least one second.
    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_seconds.max(1))
    }
}
