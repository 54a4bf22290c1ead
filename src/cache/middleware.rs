//! Cache-aside response middleware.
//!
//! Serves GET requests from the shared store when a fresh entry exists and
//! otherwise stores the handler's successful response for later readers.
//! Every response passing through carries `X-Cache: HIT` or `X-Cache: MISS`.
//! Entries are keyed by the user whose data the request reads (see
//! [`owner_scoped_key`]).

use std::{sync::Arc, time::Duration};

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use http_body_util::BodyExt;
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::{
    entry::CacheEntry,
    keys::owner_scoped_key,
    store::{KeyValueStore, KeyValueStoreExt},
};
use crate::application::identity::Principal;

pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");

const METRIC_RESPONSE_CACHE_TOTAL: &str = "habit_tracker_cache_response_total";

/// What the middleware did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Replayed from the store; the handler did not run.
    Hit,
    /// Handler ran and its response was written to the store.
    Stored,
    /// Handler ran and its response was not (or could not be) stored.
    Uncached,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Stored => "stored",
            CacheOutcome::Uncached => "uncached",
        }
    }
}

/// Per-route cache state; each cached route is layered with its own TTL.
#[derive(Clone)]
pub struct ResponseCacheState {
    pub store: Arc<dyn KeyValueStore>,
    pub enabled: bool,
    pub ttl: Duration,
    pub max_body_bytes: usize,
}

impl ResponseCacheState {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration, max_body_bytes: usize) -> Self {
        Self {
            store,
            enabled: true,
            ttl,
            max_body_bytes,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<ResponseCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.enabled || request.method() != Method::GET {
        return next.run(request).await;
    }

    let caller = request.extensions().get::<Principal>().copied();
    let Some(key) = owner_scoped_key(
        caller.map(|principal| principal.user_id),
        caller.is_some_and(|principal| principal.is_admin()),
        request.uri().path(),
        request.uri().query(),
    ) else {
        debug!(cache = "response", outcome = "bypass", "request does not map to a cacheable owner");
        counter!(METRIC_RESPONSE_CACHE_TOTAL, "outcome" => CacheOutcome::Uncached.as_str())
            .increment(1);
        let mut response = next.run(request).await;
        mark(&mut response, "MISS");
        return response;
    };

    match cache.store.get_json::<CacheEntry>(&key).await {
        Ok(Some(entry)) => {
            debug!(cache = "response", outcome = "hit", key = %key, "serving cached response");
            counter!(METRIC_RESPONSE_CACHE_TOTAL, "outcome" => CacheOutcome::Hit.as_str())
                .increment(1);
            let mut response = entry.into_response();
            mark(&mut response, "HIT");
            return response;
        }
        Ok(None) => {}
        Err(err) => {
            warn!(cache = "response", key = %key, error = %err, "cache lookup failed, treating as miss");
        }
    }

    let response = next.run(request).await;
    let (outcome, mut response) = store_response(&cache, &key, response).await;

    debug!(cache = "response", outcome = outcome.as_str(), key = %key, "cache miss handled");
    counter!(METRIC_RESPONSE_CACHE_TOTAL, "outcome" => outcome.as_str()).increment(1);
    mark(&mut response, "MISS");
    response
}

async fn store_response(
    cache: &ResponseCacheState,
    key: &str,
    response: Response,
) -> (CacheOutcome, Response) {
    if !should_store_response(&response) {
        return (CacheOutcome::Uncached, response);
    }

    if response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|len| len > cache.max_body_bytes as u64)
    {
        return (CacheOutcome::Uncached, response);
    }

    let (parts, mut body) = response.into_parts();
    let mut buffered = BytesMut::new();
    loop {
        let Some(frame) = body.frame().await else {
            break;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(cache = "response", key, error = %err, "failed to buffer response body");
                return (
                    CacheOutcome::Uncached,
                    StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                );
            }
        };
        // Trailers are not replayed.
        let Ok(data) = frame.into_data() else {
            continue;
        };
        if buffered.len() + data.len() > cache.max_body_bytes {
            // Over the limit: hand the client what was read plus the rest of
            // the stream without buffering it.
            let head = stream::iter([Ok::<_, axum::Error>(buffered.freeze()), Ok(data)]);
            let body = Body::from_stream(head.chain(body.into_data_stream()));
            return (CacheOutcome::Uncached, Response::from_parts(parts, body));
        }
        buffered.extend_from_slice(&data);
    }

    let bytes = buffered.freeze();
    let outcome = persist(cache, key, &parts, bytes.clone()).await;
    (outcome, Response::from_parts(parts, Body::from(bytes)))
}

async fn persist(
    cache: &ResponseCacheState,
    key: &str,
    parts: &axum::http::response::Parts,
    body: Bytes,
) -> CacheOutcome {
    let entry = CacheEntry::capture(parts.status, &parts.headers, body);
    match cache.store.set_json(key, &entry, cache.ttl).await {
        Ok(()) => CacheOutcome::Stored,
        Err(err) => {
            warn!(cache = "response", key, error = %err, "failed to store response");
            CacheOutcome::Uncached
        }
    }
}

/// Only complete, successful, per-user-safe responses are replayable.
pub fn should_store_response(response: &Response) -> bool {
    if !response.status().is_success() {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    if response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
    {
        return false;
    }

    true
}

fn mark(response: &mut Response, status: &'static str) {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status));
}
