//! Application state and the HTTP/WebSocket router.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api;
use crate::bus::NotificationBus;
use crate::metrics;
use crate::notification::Dispatcher;
use crate::realtime::RealtimeServer;
use crate::store::NotificationStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub realtime: Arc<RealtimeServer>,
    pub bus: Option<Arc<NotificationBus>>,
    pub dispatcher: Dispatcher,
    pub admin_key: Option<String>,
    pub cors_origin: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        realtime: Arc<RealtimeServer>,
        bus: Option<Arc<NotificationBus>>,
    ) -> Self {
        let dispatcher = Dispatcher::new(store.clone(), realtime.clone(), bus.clone());
        Self {
            store,
            realtime,
            bus,
            dispatcher,
            admin_key: None,
            cors_origin: None,
        }
    }

    pub fn with_admin_key(mut self, key: Option<String>) -> Self {
        self.admin_key = key;
        self
    }

    pub fn with_cors_origin(mut self, origin: Option<String>) -> Self {
        self.cors_origin = origin;
        self
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.cors_origin.clone());

    Router::new()
        // Health + scrape endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        // Realtime transport
        .route("/ws", get(ws_handler))
        // REST API, nested under /api/v1 (preserves middleware + fallback)
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let server = state.realtime.clone();
    ws.on_upgrade(move |socket| server.serve(socket))
}

/// Ready only while the bus listener holds a live subscription.
async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    match &state.bus {
        Some(bus) if !bus.is_listening() => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "bus": bus.state().as_str() })),
        )
            .into_response(),
        Some(bus) => Json(json!({ "status": "ok", "bus": bus.state().as_str() })).into_response(),
        None => Json(json!({ "status": "ok" })).into_response(),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}

fn cors_layer(extra_origin: Option<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            extra_origin.as_deref() == Some(origin_str)
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-admin-key"),
            header::HeaderName::from_static("x-request-id"),
        ])
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    // notification payloads are per-user
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.remove(header::SERVER);

    resp
}
