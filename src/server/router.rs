//! Axum router construction.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::server::handlers;
use crate::server::state::AppState;

/// Build the complete Axum router with all API routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health / sync
        .route("/api/health", get(handlers::health::health_handler))
        .route("/api/sync", get(handlers::sync::sync_handler))
        // Channels API
        .route(
            "/api/channels",
            get(handlers::channels::list_channels_handler)
                .post(handlers::channels::create_channel_handler),
        )
        .route(
            "/api/channels/:channel_id",
            get(handlers::channels::get_channel_handler)
                .patch(handlers::channels::update_channel_handler)
                .delete(handlers::channels::delete_channel_handler),
        )
        .route(
            "/api/channels/:channel_id/archive",
            post(handlers::channels::archive_channel_handler),
        )
        .route(
            "/api/channels/:channel_id/members",
            post(handlers::channels::add_member_handler),
        )
        .route(
            "/api/channels/:channel_id/members/:user_id",
            delete(handlers::channels::remove_member_handler),
        )
        // Access control API
        .route(
            "/api/channels/:channel_id/request-access",
            post(handlers::channels::request_access_handler),
        )
        .route(
            "/api/channels/:channel_id/respond",
            post(handlers::channels::respond_access_handler),
        )
        .route(
            "/api/channels/:channel_id/access",
            post(handlers::channels::update_user_access_handler),
        )
        .route(
            "/api/channels/:channel_id/access-status",
            get(handlers::channels::access_status_handler),
        )
        .route(
            "/api/channels/:channel_id/pending",
            get(handlers::channels::pending_requests_handler),
        )
        // Messages API
        .route(
            "/api/channels/:channel_id/messages",
            get(handlers::messages::list_messages_handler),
        )
        .route(
            "/api/channels/:channel_id/clear",
            post(handlers::messages::clear_channel_handler),
        )
        .route(
            "/api/messages/:message_id",
            delete(handlers::messages::delete_message_handler),
        )
        .route(
            "/api/messages/send",
            post(handlers::messages::smart_send_handler),
        )
        // Presence API
        .route("/api/presence", get(handlers::presence::get_presence_handler))
        .route(
            "/api/presence/online",
            get(handlers::presence::get_online_handler),
        )
        .route(
            "/api/presence/heartbeat",
            post(handlers::presence::heartbeat_handler),
        )
        // Gateway admin API
        .route(
            "/api/gateway/status",
            get(handlers::gateway::gateway_status_handler),
        )
        .route(
            "/api/gateway/relays",
            get(handlers::gateway::list_relays_handler),
        )
        .route(
            "/api/gateway/relays/:relay_id/disconnect",
            post(handlers::gateway::force_disconnect_handler),
        )
        // WebSocket
        .route("/api/ws", get(handlers::websocket::ws_handler))
        .with_state(state)
}
