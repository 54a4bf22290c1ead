use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::{error::ErrorReport, identity::Principal};
use crate::cache::{RateDecision, rate_limit::client_identity};

use super::error::ApiError;
use super::state::AppState;

const METRIC_RATE_LIMIT_REJECTED_TOTAL: &str = "habit_tracker_rate_limit_rejected_total";

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Attach the gateway-asserted [`Principal`], if any, to the request.
pub async fn identify(mut request: Request<Body>, next: Next) -> Response {
    let principal = match Principal::from_headers(request.headers()) {
        Ok(principal) => principal,
        Err(err) => return ApiError::from(err).into_response(),
    };
    if let Some(principal) = principal {
        request.extensions_mut().insert(principal);
    }

    let mut response = next.run(request).await;
    if let Some(principal) = principal {
        response.extensions_mut().insert(principal);
    }
    response
}

/// Fixed-window limiter in front of every route. The store being unreachable
/// never blocks traffic.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.rate_limit.enabled {
        return next.run(request).await;
    }

    let client = client_identity(&request, state.rate_limit.trust_forwarded);
    let decision = match state.rate_limiter.check(&client).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!(
                target = "habit_tracker::http::rate_limit",
                client = %client,
                error = %err,
                "rate limit store unavailable, allowing request"
            );
            RateDecision::unmetered(state.rate_limiter.limit())
        }
    };

    if !decision.allowed {
        debug!(
            target = "habit_tracker::http::rate_limit",
            client = %client,
            outcome = "rate_limited",
            "request rejected"
        );
        counter!(METRIC_RATE_LIMIT_REJECTED_TOTAL).increment(1);
        return ApiError::rate_limited(state.rate_limiter.retry_after_secs(), &decision);
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let user_id = response
        .extensions()
        .get::<Principal>()
        .map(|principal| principal.user_id);

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "habit_tracker::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                user_id = ?user_id,
                "request failed",
            );
        } else {
            warn!(
                target = "habit_tracker::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                user_id = ?user_id,
                "client request error",
            );
        }
    }

    response
}
