//! Presence queries and the heartbeat endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::presence::{ConnectionType, PresenceStatus};
use crate::server::state::AppState;
use crate::server::utils::caller_identity;

pub async fn get_presence_handler(State(state): State<AppState>) -> Response {
    Json(state.presence.get_all().await).into_response()
}

pub async fn get_online_handler(State(state): State<AppState>) -> Response {
    Json(state.presence.get_online().await).into_response()
}

#[derive(Deserialize, Default)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub status: Option<PresenceStatus>,
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
}

pub async fn heartbeat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<HeartbeatRequest>>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let record = state
        .presence
        .update(
            &caller.user_id,
            &caller.user_name,
            req.status.unwrap_or(PresenceStatus::Online),
            req.connection_type.unwrap_or(ConnectionType::Online),
        )
        .await;
    Json(record).into_response()
}
