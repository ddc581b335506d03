//! Shared application state: the assembled service graph.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::channels::ChannelRegistry;
use crate::connections::ConnectionHandler;
use crate::gateway::GatewayManager;
use crate::message_log::{MessageLog, MessageLogConfig};
use crate::presence::{PresenceConfig, PresenceTracker};
use crate::protocol::now_millis;
use crate::routing::MessageRouter;
use crate::server::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub channels: ChannelRegistry,
    pub messages: MessageLog,
    pub presence: PresenceTracker,
    pub gateway: GatewayManager,
    pub connections: ConnectionHandler,
    pub router: MessageRouter,
    pub ws_connection_count: Arc<AtomicUsize>,
    /// Milliseconds since the UNIX epoch.
    pub started_at: u64,
}

/// Construct the full service graph from a config.  Every service is an
/// isolated instance, so tests can build as many states as they need.
pub fn build_state(config: Config) -> AppState {
    let channels = ChannelRegistry::new();
    let messages = MessageLog::new(MessageLogConfig {
        max_per_channel: config.message_cap,
        admin_user_id: config.admin_user_id.clone(),
    });
    let presence = PresenceTracker::new(PresenceConfig {
        stale_timeout: config.stale_timeout,
    });
    let gateway = GatewayManager::new();
    let connections = ConnectionHandler::new(
        channels.clone(),
        messages.clone(),
        presence.clone(),
        gateway.clone(),
    );
    let router = MessageRouter::new(
        channels.clone(),
        messages.clone(),
        gateway.clone(),
        connections.clone(),
    );

    AppState {
        config,
        channels,
        messages,
        presence,
        gateway,
        connections,
        router,
        ws_connection_count: Arc::new(AtomicUsize::new(0)),
        started_at: now_millis(),
    }
}
