//! Shared helpers for the HTTP surface.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::channels::ChannelError;
use crate::message_log::MessageError;

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, axum::Json(body)).into_response()
}

/// Caller identity as produced by the out-of-scope auth layer, which by
/// contract populates these headers on every request it forwards.
pub struct Caller {
    pub user_id: String,
    pub user_name: String,
}

/// Extract the caller identity, or a 400 response when it is missing.
pub fn caller_identity(headers: &HeaderMap) -> Result<Caller, Response> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing x-user-id header"))?;
    let user_name = headers
        .get("x-user-name")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| user_id.clone());
    Ok(Caller { user_id, user_name })
}

/// Map registry errors onto the HTTP taxonomy.
pub fn channel_error_response(error: ChannelError) -> Response {
    let status = match &error {
        ChannelError::NotFound(_) => StatusCode::NOT_FOUND,
        ChannelError::Forbidden(_) => StatusCode::FORBIDDEN,
        ChannelError::Conflict(_) => StatusCode::CONFLICT,
    };
    api_error(status, error.to_string())
}

/// Map message-log errors onto the HTTP taxonomy.
pub fn message_error_response(error: MessageError) -> Response {
    let status = match &error {
        MessageError::NotFound(_) => StatusCode::NOT_FOUND,
        MessageError::Forbidden(_) => StatusCode::FORBIDDEN,
    };
    api_error(status, error.to_string())
}

/// Serialize a value for inclusion in a broadcast frame.
pub fn to_event_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
