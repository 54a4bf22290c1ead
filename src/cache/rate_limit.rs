//! Fixed-window request limiter backed by the shared key-value store.
//!
//! Each client identity owns one counter per window. The counter is created
//! with the window as its expiry, so all instances behind a load balancer
//! share the same budget.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
};

use super::keys::rate_key;
use super::store::{KeyValueStore, StoreError};

pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Identity used when neither a forwarded address nor the peer is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
}

impl RateDecision {
    /// Decision used when the store cannot be consulted.
    pub fn unmetered(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
        }
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(REMAINING_HEADER, HeaderValue::from(self.remaining));
    }
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    /// Count one request for `client_id` against the current window.
    pub async fn check(&self, client_id: &str) -> Result<RateDecision, StoreError> {
        let count = self
            .store
            .increment_with_ttl(&rate_key(client_id), self.window)
            .await?;
        let count = u32::try_from(count).unwrap_or(u32::MAX);

        Ok(RateDecision {
            allowed: count <= self.limit,
            limit: self.limit,
            remaining: self.limit.saturating_sub(count),
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// Resolve the identity a request is metered under.
///
/// The first `X-Forwarded-For` hop is only honoured when the deployment sits
/// behind a proxy that overwrites it.
pub fn client_identity<B>(request: &Request<B>, trust_forwarded: bool) -> String {
    if trust_forwarded
        && let Some(forwarded) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    {
        return forwarded.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
