//! Channel lifecycle and access-control endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::channels::ChannelRegistry;
use crate::protocol::{ChannelKind, ServerFrame, Visibility};
use crate::server::state::AppState;
use crate::server::utils::{api_error, caller_identity, channel_error_response, to_event_value};

#[derive(Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub member_ids: Option<Vec<String>>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default)]
    pub requires_approval: bool,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

pub async fn create_channel_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateChannelRequest>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if req.name.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "channel name must not be empty");
    }

    let channel = state
        .channels
        .create(
            &req.name,
            req.kind,
            &caller.user_id,
            req.member_ids,
            req.visibility,
            req.requires_approval,
        )
        .await;

    // The creator's live connections start receiving the channel right away.
    state
        .connections
        .subscribe_user(&caller.user_id, &channel.id)
        .await;
    state
        .connections
        .broadcast_all(&ServerFrame::ChannelCreated {
            channel: to_event_value(&channel),
        })
        .await;

    (StatusCode::CREATED, Json(channel)).into_response()
}

#[derive(Deserialize)]
pub struct ListChannelsQuery {
    #[serde(default)]
    pub include_archived: bool,
}

pub async fn list_channels_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListChannelsQuery>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let channels = state
        .channels
        .list_for_user(&caller.user_id, query.include_archived)
        .await;
    Json(channels).into_response()
}

pub async fn get_channel_handler(
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
    if !ChannelRegistry::can_see_in_listing(&channel, &caller.user_id) {
        return api_error(StatusCode::FORBIDDEN, "channel is not visible to you");
    }
    Json(channel).into_response()
}

#[derive(Deserialize)]
pub struct UpdateChannelRequest {
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub requires_approval: Option<bool>,
}

pub async fn update_channel_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<UpdateChannelRequest>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(current) = state.channels.get(&channel_id).await else {
        return api_error(StatusCode::NOT_FOUND, "channel not found");
    };
    let visibility = req.visibility.unwrap_or(current.visibility);
    match state
        .channels
        .update_visibility(&channel_id, &caller.user_id, visibility, req.requires_approval)
        .await
    {
        Ok(channel) => {
            state
                .connections
                .broadcast_all(&ServerFrame::ChannelUpdated {
                    channel: to_event_value(&channel),
                })
                .await;
            Json(channel).into_response()
        }
        Err(error) => channel_error_response(error),
    }
}

pub async fn delete_channel_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.channels.delete(&channel_id, &caller.user_id).await {
        Ok(()) => {
            state
                .connections
                .broadcast_all(&ServerFrame::ChannelDeleted {
                    channel_id: channel_id.clone(),
                })
                .await;
            Json(serde_json::json!({ "deleted": true })).into_response()
        }
        Err(error) => channel_error_response(error),
    }
}

pub async fn archive_channel_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.channels.archive(&channel_id, &caller.user_id).await {
        Ok(channel) => {
            state
                .connections
                .broadcast_all(&ServerFrame::ChannelUpdated {
                    channel: to_event_value(&channel),
                })
                .await;
            Json(channel).into_response()
        }
        Err(error) => channel_error_response(error),
    }
}

#[derive(Deserialize)]
pub struct MemberRequest {
    pub user_id: String,
}

pub async fn add_member_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Json(req): Json<MemberRequest>,
) -> Response {
    match state.channels.add_member(&channel_id, &req.user_id).await {
        Ok(added) => {
            state.connections.subscribe_user(&req.user_id, &channel_id).await;
            Json(serde_json::json!({ "added": added })).into_response()
        }
        Err(error) => channel_error_response(error),
    }
}

pub async fn remove_member_handler(
    State(state): State<AppState>,
    Path((channel_id, user_id)): Path<(String, String)>,
) -> Response {
    match state.channels.remove_member(&channel_id, &user_id).await {
        Ok(removed) => {
            state.connections.unsubscribe_user(&user_id, &channel_id).await;
            Json(serde_json::json!({ "removed": removed })).into_response()
        }
        Err(error) => channel_error_response(error),
    }
}

pub async fn request_access_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.channels.request_access(&channel_id, &caller.user_id).await {
        Ok(()) => Json(serde_json::json!({ "status": "pending" })).into_response(),
        Err(error) => channel_error_response(error),
    }
}

#[derive(Deserialize)]
pub struct RespondAccessRequest {
    pub requester_id: String,
    pub approve: bool,
}

pub async fn respond_access_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<RespondAccessRequest>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state
        .channels
        .respond_to_access_request(&channel_id, &req.requester_id, &caller.user_id, req.approve)
        .await
    {
        Ok(channel) => {
            if req.approve {
                state
                    .connections
                    .subscribe_user(&req.requester_id, &channel_id)
                    .await;
            }
            state
                .connections
                .broadcast_all(&ServerFrame::ChannelUpdated {
                    channel: to_event_value(&channel),
                })
                .await;
            Json(channel).into_response()
        }
        Err(error) => channel_error_response(error),
    }
}

#[derive(Deserialize)]
pub struct UpdateAccessRequest {
    pub user_id: String,
    pub allow: bool,
}

pub async fn update_user_access_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(req): Json<UpdateAccessRequest>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state
        .channels
        .update_user_access(&channel_id, &req.user_id, &caller.user_id, req.allow)
        .await
    {
        Ok(channel) => {
            if !req.allow {
                state
                    .connections
                    .unsubscribe_user(&req.user_id, &channel_id)
                    .await;
            }
            Json(channel).into_response()
        }
        Err(error) => channel_error_response(error),
    }
}

pub async fn access_status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.channels.get_access_status(&channel_id, &caller.user_id).await {
        Some(status) => Json(serde_json::json!({ "status": status })).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "channel not found"),
    }
}

pub async fn pending_requests_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> Response {
    let caller = match caller_identity(&headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.channels.pending_requests(&channel_id, &caller.user_id).await {
        Ok(pending) => Json(serde_json::json!({ "pending": pending })).into_response(),
        Err(error) => channel_error_response(error),
    }
}
