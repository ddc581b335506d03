//! Message retrieval, deletion, clearing, and the smart-send endpoint.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::channels::ChannelRegistry;
use crate::protocol::ServerFrame;
use crate::routing::{RouteError, SmartSendRequest};
use crate::server::state::AppState;
use crate::server::utils::{api_error, caller_identity, message_error_response};

const DEFAULT_FETCH_LIMIT: usize = 50;

#[derive(Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    /// Timestamp cursor: only messages strictly older are returned.
    #[serde(default)]
    pub before: Option<u64>,
}

pub async fn list_messages_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(channel) = state.channels.get(&channel_id).await else {
        return api_error(StatusCode::NOT_FOUND, "channel not found");
    };
    if !ChannelRegistry::can_access(&channel, &caller.user_id) {
        return api_error(StatusCode::FORBIDDEN, "no access to this channel");
    }

    let limit = query.limit.unwrap_or(DEFAULT_FETCH_LIMIT);
    let messages = state
        .messages
        .get_for_channel(&channel.id, limit, query.before)
        .await;
    Json(messages).into_response()
}

pub async fn clear_channel_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(channel) = state.channels.get(&channel_id).await else {
        return api_error(StatusCode::NOT_FOUND, "channel not found");
    };
    if caller.user_id != channel.creator_id && caller.user_id != state.config.admin_user_id {
        return api_error(
            StatusCode::FORBIDDEN,
            "only the channel creator or an administrator may clear a channel",
        );
    }

    let cleared_at = state.messages.clear_channel(&channel.id).await;
    state
        .connections
        .broadcast_all(&ServerFrame::ChannelCleared {
            channel_id: channel.id.clone(),
            cleared_at,
        })
        .await;
    Json(serde_json::json!({ "cleared_at": cleared_at })).into_response()
}

pub async fn delete_message_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.messages.delete_message(&message_id, &caller.user_id).await {
        Ok(message) => {
            state
                .connections
                .broadcast_all(&ServerFrame::MessageDeleted {
                    channel_id: message.channel_id.clone(),
                    message_id: message.id.clone(),
                })
                .await;
            Json(serde_json::json!({ "deleted": true })).into_response()
        }
        Err(error) => message_error_response(error),
    }
}

pub async fn smart_send_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SmartSendRequest>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state
        .router
        .smart_send(&caller.user_id, &caller.user_name, request)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(error @ RouteError::ChannelNotFound(_)) => {
            api_error(StatusCode::NOT_FOUND, error.to_string())
        }
    }
}
