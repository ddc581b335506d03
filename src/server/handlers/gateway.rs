//! Gateway admin surface: status, relay listing, forced disconnect.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::protocol::now_millis;
use crate::server::state::AppState;
use crate::server::utils::{api_error, caller_identity};

pub async fn gateway_status_handler(State(state): State<AppState>) -> Response {
    let relay_count = state.gateway.relay_count().await;
    Json(serde_json::json!({
        "connected": relay_count > 0,
        "relay_count": relay_count,
    }))
    .into_response()
}

pub async fn list_relays_handler(State(state): State<AppState>) -> Response {
    let now = now_millis();
    let relays: Vec<serde_json::Value> = state
        .gateway
        .relays()
        .await
        .into_iter()
        .map(|r| {
            serde_json::json!({
                "relay_id": r.relay_id,
                "name": r.name,
                "capabilities": r.capabilities,
                "connected_at": r.connected_at,
                "last_activity": r.last_activity,
                "connected_secs": now.saturating_sub(r.connected_at) / 1000,
                "idle_secs": now.saturating_sub(r.last_activity) / 1000,
            })
        })
        .collect();
    Json(relays).into_response()
}

#[derive(Deserialize, Default)]
pub struct DisconnectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn force_disconnect_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(relay_id): Path<String>,
    body: Option<Json<DisconnectRequest>>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if caller.user_id != state.config.admin_user_id {
        return api_error(
            StatusCode::FORBIDDEN,
            "only an administrator may disconnect relays",
        );
    }

    let reason = body
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "disconnected by administrator".to_string());
    if state.gateway.force_disconnect(&relay_id, &reason).await {
        Json(serde_json::json!({ "disconnected": true })).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "relay not found")
    }
}
