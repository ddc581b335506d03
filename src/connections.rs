//! Connection handling for the cloud transport.
//!
//! Each live connection runs a state machine: unauthenticated until an
//! `auth` frame binds it to a user identity, optionally promoted to relay
//! status by `gateway_connect`, and closed on transport error or disconnect.
//!
//! Outbound delivery is isolated per connection: every connection owns an
//! unbounded channel drained by its own socket task, so a slow or dead
//! client never stalls broadcasts to others.  A failed send means the
//! receiving task is gone; the connection is treated as dead and cleaned up
//! by its own socket loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::channels::ChannelRegistry;
use crate::gateway::GatewayManager;
use crate::message_log::MessageLog;
use crate::presence::{ConnectionType, PresenceStatus, PresenceTracker};
use crate::protocol::{is_canonical_id, ClientFrame, MeshMessage, Message, Origin, ServerFrame};
use crate::xlog;

/// What a connection's socket task is asked to do next.
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    Close,
}

/// Handle for pushing frames toward one connection's socket task.
pub type FrameSender = mpsc::UnboundedSender<Outbound>;

struct ConnEntry {
    user_id: Option<String>,
    user_name: Option<String>,
    /// Set once the connection is promoted to relay status.
    relay_id: Option<String>,
    subscriptions: HashSet<String>,
    tx: FrameSender,
}

struct ConnMap {
    connections: HashMap<u64, ConnEntry>,
    next_conn_id: u64,
}

/// Terminates cloud-side connections: authentication, subscriptions, and
/// message fan-in/fan-out.
#[derive(Clone)]
pub struct ConnectionHandler {
    channels: ChannelRegistry,
    messages: MessageLog,
    presence: PresenceTracker,
    gateway: GatewayManager,
    inner: Arc<Mutex<ConnMap>>,
}

impl ConnectionHandler {
    pub fn new(
        channels: ChannelRegistry,
        messages: MessageLog,
        presence: PresenceTracker,
        gateway: GatewayManager,
    ) -> Self {
        Self {
            channels,
            messages,
            presence,
            gateway,
            inner: Arc::new(Mutex::new(ConnMap {
                connections: HashMap::new(),
                next_conn_id: 0,
            })),
        }
    }

    /// Track a freshly-upgraded connection.  Returns its connection id.
    pub async fn register_connection(&self, tx: FrameSender) -> u64 {
        let mut inner = self.inner.lock().await;
        let conn_id = inner.next_conn_id;
        inner.next_conn_id += 1;
        inner.connections.insert(
            conn_id,
            ConnEntry {
                user_id: None,
                user_name: None,
                relay_id: None,
                subscriptions: HashSet::new(),
                tx,
            },
        );
        conn_id
    }

    /// Dispatch one inbound frame for a connection.
    pub async fn handle_frame(&self, conn_id: u64, frame: ClientFrame) {
        match frame {
            ClientFrame::Auth {
                user_id,
                user_name,
                is_relay,
                ..
            } => self.authenticate(conn_id, user_id, user_name, is_relay).await,
            ClientFrame::Message {
                channel_id,
                content,
                recipient_id,
                recipient_name,
            } => {
                self.on_chat_message(conn_id, channel_id, content, recipient_id, recipient_name)
                    .await
            }
            ClientFrame::GatewayConnect {
                relay_id,
                name,
                capabilities,
            } => self.on_gateway_connect(conn_id, relay_id, name, capabilities).await,
            ClientFrame::GatewayMessage { message } => {
                self.on_gateway_message(conn_id, message).await
            }
        }
    }

    /// Bind the connection to a user identity, mark presence, auto-subscribe
    /// to the user's channels, and announce the updated presence list.
    async fn authenticate(&self, conn_id: u64, user_id: String, user_name: String, is_relay: bool) {
        let subscriptions = self.channels.subscribe_user_to_channels(&user_id).await;
        let summaries = self.channels.summaries(&subscriptions).await;

        {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.connections.get_mut(&conn_id) else {
                return;
            };
            entry.user_id = Some(user_id.clone());
            entry.user_name = Some(user_name.clone());
            entry.subscriptions = subscriptions.into_iter().collect();
        }

        let connection_type = if is_relay {
            ConnectionType::Gateway
        } else {
            ConnectionType::Online
        };
        self.presence
            .update(&user_id, &user_name, PresenceStatus::Online, connection_type)
            .await;

        xlog!(
            "conn {}: authenticated as {}",
            conn_id,
            crate::logging::user_id(&user_id)
        );

        self.send_to(
            conn_id,
            ServerFrame::AuthOk {
                user_id,
                channels: summaries,
            },
        )
        .await;
        self.broadcast_presence().await;
    }

    /// Persist a chat message, acknowledge the sender, fan out to cloud
    /// subscribers, and forward to the offline network when a relay is
    /// attached.
    async fn on_chat_message(
        &self,
        conn_id: u64,
        channel_id: String,
        content: String,
        recipient_id: Option<String>,
        recipient_name: Option<String>,
    ) {
        let Some((sender_id, sender_name)) = self.identity_of(conn_id).await else {
            self.send_error(conn_id, "not authenticated").await;
            return;
        };

        let message = self
            .messages
            .add(
                &channel_id,
                &sender_id,
                &sender_name,
                &content,
                Origin::Online,
                recipient_id,
                recipient_name,
            )
            .await;

        self.send_to(
            conn_id,
            ServerFrame::MessageAck {
                message_id: message.id.clone(),
            },
        )
        .await;

        let frame = ServerFrame::Message {
            message: message.clone(),
        };
        self.broadcast_to_channel(&channel_id, &frame).await;

        // Offline delivery is fire-and-forget: failures are logged, never
        // surfaced to the sender.
        if self.gateway.has_connected_relay().await {
            let delivered = self.gateway.broadcast_to_relays(&message).await;
            if delivered == 0 {
                xlog!(
                    "conn {}: no relay accepted {}",
                    conn_id,
                    crate::logging::msg_id(&message.id)
                );
            }
        }
    }

    /// Promote an authenticated connection to relay status.
    async fn on_gateway_connect(
        &self,
        conn_id: u64,
        relay_id: String,
        name: String,
        capabilities: Vec<String>,
    ) {
        let tx = {
            let mut inner = self.inner.lock().await;
            match inner.connections.get_mut(&conn_id) {
                None => return,
                Some(entry) if entry.user_id.is_none() => None,
                Some(entry) => {
                    entry.relay_id = Some(relay_id.clone());
                    Some(entry.tx.clone())
                }
            }
        };
        let Some(tx) = tx else {
            self.send_error(conn_id, "not authenticated").await;
            return;
        };

        let info = self.gateway.register(&relay_id, &name, capabilities, tx).await;
        self.send_to(conn_id, ServerFrame::GatewayConnect { relay: info })
            .await;
    }

    /// Ingest a message a relay forwarded from the offline network.
    ///
    /// Mesh messages address channels by human name; resolution goes through
    /// the strict identifier check first, then a case-insensitive name
    /// lookup.  Unresolvable messages are dropped and logged.  Fan-out to
    /// cloud subscribers happens through the gateway's mesh-event channel,
    /// not here.
    async fn on_gateway_message(&self, conn_id: u64, mesh: MeshMessage) {
        let relay_id = {
            let inner = self.inner.lock().await;
            inner
                .connections
                .get(&conn_id)
                .and_then(|e| e.relay_id.clone())
        };
        let Some(relay_id) = relay_id else {
            self.send_error(conn_id, "gateway authentication required").await;
            return;
        };

        let resolved = if is_canonical_id(&mesh.channel_id) {
            self.channels.get(&mesh.channel_id).await
        } else {
            self.channels.find_by_name(&mesh.channel_id).await
        };
        let Some(channel) = resolved else {
            xlog!(
                "conn {}: dropping mesh message for unknown channel '{}'",
                conn_id,
                mesh.channel_id
            );
            return;
        };

        let message = self
            .messages
            .add(
                &channel.id,
                &mesh.sender_id,
                &mesh.sender_name,
                &mesh.content,
                mesh.origin.unwrap_or(Origin::Mesh),
                mesh.recipient_id,
                mesh.recipient_name,
            )
            .await;

        self.gateway.on_mesh_message(&relay_id, message).await;
    }

    /// Clean up after a closed connection: presence, relay role, and the
    /// connection table.
    pub async fn disconnect(&self, conn_id: u64) {
        let entry = {
            let mut inner = self.inner.lock().await;
            inner.connections.remove(&conn_id)
        };
        let Some(entry) = entry else {
            return;
        };

        if let Some(user_id) = &entry.user_id {
            self.presence.set_offline(user_id).await;
        }
        if let Some(relay_id) = &entry.relay_id {
            self.gateway.unregister(relay_id).await;
        }
        if entry.user_id.is_some() {
            self.broadcast_presence().await;
        }
    }

    /// Add a channel to a user's live subscriptions on every connection
    /// authenticated as that user (used after channel creation or approval).
    pub async fn subscribe_user(&self, user_id: &str, channel_id: &str) {
        let mut inner = self.inner.lock().await;
        for entry in inner.connections.values_mut() {
            if entry.user_id.as_deref() == Some(user_id) {
                entry.subscriptions.insert(channel_id.to_string());
            }
        }
    }

    /// Drop a channel from a user's live subscriptions on every connection
    /// authenticated as that user.
    pub async fn unsubscribe_user(&self, user_id: &str, channel_id: &str) {
        let mut inner = self.inner.lock().await;
        for entry in inner.connections.values_mut() {
            if entry.user_id.as_deref() == Some(user_id) {
                entry.subscriptions.remove(channel_id);
            }
        }
    }

    /// Send to every live connection subscribed to a channel.
    pub async fn broadcast_to_channel(&self, channel_id: &str, frame: &ServerFrame) {
        let inner = self.inner.lock().await;
        for entry in inner.connections.values() {
            if entry.subscriptions.contains(channel_id) {
                let _ = entry.tx.send(Outbound::Frame(frame.clone()));
            }
        }
    }

    /// Send to every live connection, authenticated or not.
    pub async fn broadcast_all(&self, frame: &ServerFrame) {
        let inner = self.inner.lock().await;
        for entry in inner.connections.values() {
            let _ = entry.tx.send(Outbound::Frame(frame.clone()));
        }
    }

    /// Fan the current presence list out to all connections.
    pub async fn broadcast_presence(&self) {
        let users = self.presence.get_all().await;
        self.broadcast_all(&ServerFrame::PresenceUpdate { users }).await;
    }

    /// Spawn the task that fans mesh-origin messages out to subscribed cloud
    /// connections.  This is the gateway bridge's only subscriber in the
    /// server process.
    pub fn spawn_mesh_fanout(&self) -> JoinHandle<()> {
        let handler = self.clone();
        let mut events = self.gateway.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let channel_id = event.message.channel_id.clone();
                        let frame = ServerFrame::Message {
                            message: event.message,
                        };
                        handler.broadcast_to_channel(&channel_id, &frame).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        xlog!("mesh fanout lagged, skipped {} event(s)", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Push an error frame to one connection.
    pub async fn send_error(&self, conn_id: u64, error: &str) {
        self.send_to(
            conn_id,
            ServerFrame::Error {
                error: error.to_string(),
            },
        )
        .await;
    }

    async fn send_to(&self, conn_id: u64, frame: ServerFrame) {
        let inner = self.inner.lock().await;
        if let Some(entry) = inner.connections.get(&conn_id) {
            let _ = entry.tx.send(Outbound::Frame(frame));
        }
    }

    async fn identity_of(&self, conn_id: u64) -> Option<(String, String)> {
        let inner = self.inner.lock().await;
        let entry = inner.connections.get(&conn_id)?;
        let user_id = entry.user_id.clone()?;
        let user_name = entry.user_name.clone().unwrap_or_else(|| user_id.clone());
        Some((user_id, user_name))
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Broadcast a `Message` fan-out frame to subscribers of its channel.
    /// Used by the routing facade after persisting.
    pub async fn fan_out_message(&self, message: &Message) {
        let frame = ServerFrame::Message {
            message: message.clone(),
        };
        self.broadcast_to_channel(&message.channel_id, &frame).await;
    }
}
