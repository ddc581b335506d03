//! Reconnection sync: per-channel clear tombstones.
//!
//! Reconnecting clients compare these timestamps against their local caches
//! and purge messages older than the last clear.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::protocol::now_millis;
use crate::server::state::AppState;

pub async fn sync_handler(State(state): State<AppState>) -> Response {
    let channel_cleared_at = state.messages.get_all_clear_timestamps().await;
    Json(serde_json::json!({
        "channel_cleared_at": channel_cleared_at,
        "server_time": now_millis(),
    }))
    .into_response()
}
