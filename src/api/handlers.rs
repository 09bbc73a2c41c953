use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;
use crate::models::notification::NotificationKind;
use crate::notification::{format_notification, DispatchOutcome, FormattedNotification};

const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

// ── Producer ─────────────────────────────────────────────────

/// POST /api/v1/notifications: persist and deliver one notification
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<DispatchOutcome>), AppError> {
    let user_id = payload.user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::BadRequest("userId is required".into()));
    }
    if payload.kind.trim().is_empty() {
        return Err(AppError::BadRequest("type is required".into()));
    }
    let content = match payload.content {
        serde_json::Value::Null => json!({}),
        serde_json::Value::Object(map) => serde_json::Value::Object(map),
        _ => return Err(AppError::BadRequest("content must be an object".into())),
    };

    let outcome = DispatchOutcome::from(
        state
            .dispatcher
            .create_and_send(user_id, NotificationKind::from(payload.kind.trim()), content)
            .await,
    );
    let status = if outcome.is_success() {
        StatusCode::CREATED
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(outcome)))
}

// ── Read side ────────────────────────────────────────────────

/// GET /api/v1/users/:user_id/notifications: most recent, newest first
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<FormattedNotification>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let rows = state.store.list(&user_id, limit).await?;
    Ok(Json(rows.iter().map(format_notification).collect()))
}

/// GET /api/v1/users/:user_id/notifications/unread
pub async fn list_unread_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<FormattedNotification>>, AppError> {
    let rows = state.store.list_unread(&user_id).await?;
    Ok(Json(rows.iter().map(format_notification).collect()))
}

/// GET /api/v1/users/:user_id/notifications/unread/count
pub async fn count_unread_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.store.count_unread(&user_id).await?;
    Ok(Json(json!({ "count": count })))
}

/// POST /api/v1/users/:user_id/notifications/:id/read
pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path((user_id, id_str)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = Uuid::parse_str(&id_str)
        .map_err(|_| AppError::BadRequest(format!("invalid notification id '{}'", id_str)))?;

    if !state.store.mark_read(&user_id, id).await? {
        return Err(AppError::NotFound("notification"));
    }
    Ok(Json(json!({ "success": true })))
}

/// POST /api/v1/users/:user_id/notifications/read-all
pub async fn mark_all_notifications_read(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state.store.mark_all_read(&user_id).await?;
    Ok(Json(json!({ "success": true, "updated": updated })))
}
