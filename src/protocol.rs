//! Wire types shared by the cloud and mesh transports.
//!
//! - `Message` is the canonical chat record both transports carry; its
//!   `origin` field records which transport(s) produced or forwarded it.
//! - Message IDs are content-derived: SHA-256 over the identifying fields
//!   plus a per-log sequence number, encoded as URL-safe base64 without
//!   padding.
//! - `ClientFrame` and `ServerFrame` are the closed tagged unions for the
//!   persistent-connection protocol.  Unknown frame tags fail to deserialize
//!   and are answered with an `error` frame rather than being silently
//!   ignored.
//!
//! These types are intentionally small and self-contained so they can be
//! reused across the connection handler, the gateway bridge, and the HTTP
//! surface.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::gateway::RelayInfo;
use crate::presence::PresenceRecord;

/// Transport(s) that produced or forwarded a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "mesh")]
    Mesh,
    #[serde(rename = "gateway")]
    Gateway,
    #[serde(rename = "online+mesh")]
    OnlineMesh,
}

/// What kind of conversation a channel hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Broadcast,
    Group,
    DirectMessage,
}

/// Who may discover and join a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Restricted,
}

/// A chat message as stored and fanned out.  Immutable once created except
/// for full deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recipient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recipient_name: Option<String>,
}

/// Compact channel descriptor included in `auth_ok` replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelSummary {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
}

/// Derive a message ID from its identifying fields.
///
/// The per-log sequence number keeps IDs unique even when two messages share
/// sender, channel, content, and millisecond timestamp.
pub fn derive_message_id(
    channel_id: &str,
    sender_id: &str,
    timestamp: u64,
    seq: u64,
    content: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(channel_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(sender_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(timestamp.to_le_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(content.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Strict shape check for a canonical channel identifier (hyphenated UUID,
/// 8-4-4-4-12 hex groups).
///
/// Anything that fails this check is treated as a human-readable channel
/// name.  A bare hyphen test is not enough: channel names may legitimately
/// contain hyphens ("crew-a") and must not be mistaken for identifiers.
pub fn is_canonical_id(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    if groups.len() != 5 {
        return false;
    }
    const GROUP_LENS: [usize; 5] = [8, 4, 4, 4, 12];
    groups
        .iter()
        .zip(GROUP_LENS)
        .all(|(group, len)| group.len() == len && group.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A message record arriving from the offline network through a relay.
///
/// Mesh peers address channels by human-readable name; `channel_id` may hold
/// either a canonical identifier or a bare name, resolved on ingestion.
/// Extra fields a relay forwards (its own id or timestamp) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MeshMessage {
    pub channel_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    #[serde(default)]
    pub origin: Option<Origin>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
}

/// Frames a client (cloud peer or relay) may send over its connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        user_id: String,
        user_name: String,
        #[serde(default)]
        is_relay: bool,
        #[serde(default)]
        relay_id: Option<String>,
    },
    Message {
        channel_id: String,
        content: String,
        #[serde(default)]
        recipient_id: Option<String>,
        #[serde(default)]
        recipient_name: Option<String>,
    },
    GatewayConnect {
        relay_id: String,
        name: String,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    GatewayMessage {
        message: MeshMessage,
    },
}

/// Frames the server pushes to connections.  `InjectMessage` and
/// `AdminDisconnect` are only ever sent to relay connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk {
        user_id: String,
        channels: Vec<ChannelSummary>,
    },
    MessageAck {
        message_id: String,
    },
    Message {
        message: Message,
    },
    PresenceUpdate {
        users: Vec<PresenceRecord>,
    },
    ChannelCreated {
        channel: serde_json::Value,
    },
    ChannelUpdated {
        channel: serde_json::Value,
    },
    ChannelDeleted {
        channel_id: String,
    },
    ChannelCleared {
        channel_id: String,
        cleared_at: u64,
    },
    MessageDeleted {
        channel_id: String,
        message_id: String,
    },
    GatewayConnect {
        relay: RelayInfo,
    },
    InjectMessage {
        message: Message,
    },
    AdminDisconnect {
        reason: String,
    },
    Error {
        error: String,
    },
}
