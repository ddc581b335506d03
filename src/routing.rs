//! Smart send: the routing decision that ties both transports together.
//!
//! Request-handling code hands an inbound message here; the facade resolves
//! the channel (accepting either a canonical identifier or a human-readable
//! name), decides whether the message must additionally be pushed to the
//! offline network, persists it with the matching origin tag, and fans it
//! out.  The offline hop itself is outside this subsystem's visibility, so
//! the reported relay count is a delivery count, not a delivery
//! confirmation.

use serde::{Deserialize, Serialize};

use crate::channels::ChannelRegistry;
use crate::connections::ConnectionHandler;
use crate::gateway::GatewayManager;
use crate::message_log::MessageLog;
use crate::protocol::{is_canonical_id, Message, Origin};
use crate::xlog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    ChannelNotFound(String),
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteError::ChannelNotFound(name) => write!(f, "channel not found: {}", name),
        }
    }
}

impl std::error::Error for RouteError {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SmartSendRequest {
    /// Canonical identifier or human-readable channel name.
    pub channel_id: String,
    pub content: String,
    /// When set, skip cloud-side relay injection decisions: the caller only
    /// wants the message persisted and fanned out online.
    #[serde(default)]
    pub mesh_only: bool,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SmartSendOutcome {
    pub message: Message,
    pub mesh_injected: bool,
    /// How many relays accepted the injection; zero when no relay was
    /// connected or every send failed.
    pub relay_count: usize,
}

/// Decision logic for routing an inbound message across both transports.
#[derive(Clone)]
pub struct MessageRouter {
    channels: ChannelRegistry,
    messages: MessageLog,
    gateway: GatewayManager,
    connections: ConnectionHandler,
}

impl MessageRouter {
    pub fn new(
        channels: ChannelRegistry,
        messages: MessageLog,
        gateway: GatewayManager,
        connections: ConnectionHandler,
    ) -> Self {
        Self {
            channels,
            messages,
            gateway,
            connections,
        }
    }

    /// Route one message: resolve, persist, fan out online, and push to the
    /// offline network when possible.
    ///
    /// Resolution failure aborts the whole operation; there is no partial
    /// send.  An unavailable relay degrades to online-only delivery and is
    /// never an error.
    pub async fn smart_send(
        &self,
        sender_id: &str,
        sender_name: &str,
        request: SmartSendRequest,
    ) -> Result<SmartSendOutcome, RouteError> {
        let channel = if is_canonical_id(&request.channel_id) {
            self.channels.get(&request.channel_id).await
        } else {
            self.channels.find_by_name(&request.channel_id).await
        };
        let channel = channel
            .ok_or_else(|| RouteError::ChannelNotFound(request.channel_id.clone()))?;

        let inject_to_mesh =
            self.gateway.has_connected_relay().await && !request.mesh_only;
        let origin = if inject_to_mesh {
            Origin::OnlineMesh
        } else {
            Origin::Online
        };

        let message = self
            .messages
            .add(
                &channel.id,
                sender_id,
                sender_name,
                &request.content,
                origin,
                request.recipient_id,
                request.recipient_name,
            )
            .await;

        self.connections.fan_out_message(&message).await;

        let relay_count = if inject_to_mesh {
            self.gateway.broadcast_to_relays(&message).await
        } else {
            0
        };

        xlog!(
            "route: {} -> {} ({:?}, {} relay(s))",
            crate::logging::msg_id(&message.id),
            crate::logging::chan_id(&channel.id),
            origin,
            relay_count
        );

        Ok(SmartSendOutcome {
            message,
            mesh_injected: inject_to_mesh,
            relay_count,
        })
    }
}
