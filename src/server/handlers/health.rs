//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::protocol::now_millis;
use crate::server::state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let now = now_millis();
    let body = serde_json::json!({
        "status": "ok",
        "channels": state.channels.count().await,
        "messages": state.messages.count().await,
        "connections": state.connections.connection_count().await,
        "relays": state.gateway.relay_count().await,
        "uptime_secs": now.saturating_sub(state.started_at) / 1000,
        "server_time": now,
    });
    (StatusCode::OK, axum::Json(body))
}
