use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};

use crate::app::AppState;
use crate::errors::AppError;

pub mod handlers;

/// Build the notification API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        // Producer entry point
        .route("/notifications", post(handlers::create_notification))
        // Per-user read side
        .route(
            "/users/:user_id/notifications",
            get(handlers::list_notifications),
        )
        .route(
            "/users/:user_id/notifications/unread",
            get(handlers::list_unread_notifications),
        )
        .route(
            "/users/:user_id/notifications/unread/count",
            get(handlers::count_unread_notifications),
        )
        .route(
            "/users/:user_id/notifications/read-all",
            post(handlers::mark_all_notifications_read),
        )
        .route(
            "/users/:user_id/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the
/// configured admin key. With no key configured the API is open (dev mode;
/// production refuses to start without one).
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided_key {
        Some(k) if k == expected => Ok(next.run(req).await),
        Some(k) => {
            // never log the expected key or the full provided key
            let masked = if k.len() > 8 && k.is_char_boundary(4) && k.is_char_boundary(k.len() - 4) {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("notification API: invalid key (provided: '{}')", masked);
            Err(AppError::Unauthorized)
        }
        None => {
            tracing::warn!("notification API: missing X-Admin-Key header");
            Err(AppError::Unauthorized)
        }
    }
}
