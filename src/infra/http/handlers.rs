use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::{StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::application::error::{AppError, ErrorReport};
use crate::application::habits::{CreateHabitCommand, LogHabitCommand};
use crate::application::identity::Principal;
use crate::domain::entities::{HabitId, UserId};

use super::error::ApiError;
use super::models::*;
use super::state::AppState;

/// Any caller the gateway vouched for.
pub struct CurrentUser(pub Principal);

/// A caller holding the admin role.
pub struct AdminUser(pub Principal);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .copied()
            .map(CurrentUser)
            .ok_or_else(ApiError::unauthorized)
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(principal) = CurrentUser::from_request_parts(parts, state).await?;
        if !principal.is_admin() {
            return Err(ApiError::forbidden());
        }
        Ok(AdminUser(principal))
    }
}

pub async fn health(State(state): State<AppState>) -> Response {
    let database = state.repo.health_check().await;
    let store = state.store.ping().await;

    let body = HealthResponse {
        status: if database.is_ok() && store.is_ok() {
            "ok"
        } else {
            "degraded"
        },
        database: if database.is_ok() { "up" } else { "down" },
        store: if store.is_ok() { "up" } else { "down" },
    };

    match (database, store) {
        (Ok(()), Ok(())) => (StatusCode::OK, Json(body)).into_response(),
        (database, store) => {
            let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
            let mut messages = Vec::new();
            if let Err(err) = database {
                messages.push(format!("database: {err}"));
            }
            if let Err(err) = store {
                messages.push(format!("store: {err}"));
            }
            ErrorReport {
                source: "infra::http::health",
                status: StatusCode::SERVICE_UNAVAILABLE,
                messages,
            }
            .attach(&mut response);
            response
        }
    }
}

pub async fn list_habits(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Query(query): Query<HabitListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let habits = state.habits.list(principal, query.user_id).await?;
    let body: Vec<HabitResponse> = habits.into_iter().map(HabitResponse::from).collect();
    Ok(Json(body))
}

pub async fn create_habit(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(payload): Json<HabitCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let habit = state
        .habits
        .create(
            principal,
            CreateHabitCommand {
                user_id: payload.user_id,
                title: payload.title,
                description: payload.description,
                frequency: payload.frequency,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(HabitResponse::from(habit))))
}

pub async fn log_habit(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(payload): Json<HabitLogRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let date = payload
        .parsed_date()
        .map_err(|err| ApiError::bad_request("invalid date", Some(err.to_string())))?;

    let log = state
        .habits
        .log(
            principal,
            LogHabitCommand {
                habit_id: payload.habit_id,
                date,
                is_completed: payload.is_completed,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(HabitLogResponse::from(log))))
}

pub async fn delete_habit(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<HabitId>,
) -> Result<impl IntoResponse, ApiError> {
    state.habits.delete(principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn user_stats(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .stats
        .user_stats(principal.user_id)
        .await
        .map_err(AppError::from)?;
    Ok(Json(stats))
}

pub async fn bulk_activate(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(payload): Json<BulkActivateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .bulk
        .set_active(payload.habit_ids, payload.is_active)
        .await?;

    info!(
        admin_id = admin.user_id,
        updated = report.updated,
        failed = report.failed,
        cancelled = report.cancelled,
        "bulk activation requested"
    );

    let status = if report.all_succeeded() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(report)))
}

pub async fn send_notifications(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(payload): Json<NotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.notifications.dispatch(payload.jobs.clone()).await?;

    let status = if report.all_succeeded() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((
        status,
        Json(NotificationResponse::from_report(&payload.jobs, report)),
    ))
}

pub async fn clear_cache(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .invalidator
        .flush_all()
        .await
        .map_err(|err| {
            warn!(admin_id = admin.user_id, error = %err, "cache flush failed");
            AppError::from(err)
        })?;

    info!(admin_id = admin.user_id, deleted, "cache cleared");
    Ok(Json(FlushResponse { deleted }))
}

pub async fn clear_user_cache(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id <= 0 {
        return Err(ApiError::bad_request(
            "invalid user id",
            Some("user id must be positive".to_string()),
        ));
    }

    let deleted = state
        .invalidator
        .flush_owner(user_id)
        .await
        .map_err(AppError::from)?;

    info!(admin_id = admin.user_id, user_id, deleted, "user cache cleared");
    Ok(Json(FlushResponse { deleted }))
}
