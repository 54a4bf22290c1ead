mod error;
mod handlers;
mod middleware;
mod models;
mod state;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use handlers::{AdminUser, CurrentUser};
pub use middleware::RequestContext;
pub use state::{AppState, RateLimitPolicy};

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

use crate::cache::response_cache_layer;

/// Every route of the service, wrapped (outermost first) in request context,
/// response logging, identity and rate limiting. The habit list is the only
/// response-cached route.
pub fn build_router(state: AppState) -> Router {
    let cached_list = axum_middleware::from_fn_with_state(
        state.response_cache.clone(),
        response_cache_layer,
    );

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/habits",
            get(handlers::list_habits)
                .layer(cached_list)
                .post(handlers::create_habit),
        )
        .route("/api/habits/log", post(handlers::log_habit))
        .route("/api/habits/stats", get(handlers::user_stats))
        .route("/api/habits/bulk/activate", post(handlers::bulk_activate))
        .route("/api/habits/{id}", delete(handlers::delete_habit))
        .route("/api/notifications", post(handlers::send_notifications))
        .route("/api/cache/clear", delete(handlers::clear_cache))
        .route("/api/cache/user/{id}", delete(handlers::clear_user_cache))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(axum_middleware::from_fn(middleware::identify))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
        .with_state(state)
}
