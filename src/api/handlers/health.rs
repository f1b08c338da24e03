//! Health check and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "wshub"
        })),
    )
}

/// Uptime and live connection count
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let shutting_down = state.hub.is_shutting_down();
    let connections = state.hub.len().await;

    Json(json!({
        "status": if shutting_down { "shutting_down" } else { "running" },
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "connections": connections,
        "settings": {
            "write_wait_ms": state.hub.settings().write_wait().as_millis() as u64,
            "pong_wait_ms": state.hub.settings().pong_wait().as_millis() as u64,
            "ping_interval_ms": state.hub.ping_interval().as_millis() as u64,
            "read_limit": state.hub.read_limit(),
        }
    }))
}
