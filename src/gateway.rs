//! Relay bridge: tracks connected gateway peers and moves messages to and
//! from the offline network.
//!
//! Each registered relay is a live connection that ferries messages between
//! this service and the mesh.  Delivery toward relays is best-effort: an
//! unwritable connection yields `false`, never an error.  Messages arriving
//! *from* the mesh are published on a broadcast channel rather than through
//! ambient callbacks, so subscribers (the connection handler's fan-out task)
//! have deterministic ordering and shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::connections::{FrameSender, Outbound};
use crate::protocol::{now_millis, Message, ServerFrame};
use crate::xlog;

/// Buffered mesh events between the bridge and its subscribers.
const MESH_EVENT_CAPACITY: usize = 256;

/// Descriptor for a connected relay, as exposed to the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelayInfo {
    pub relay_id: String,
    pub name: String,
    pub capabilities: Vec<String>,
    /// Milliseconds since the UNIX epoch.
    pub connected_at: u64,
    pub last_activity: u64,
}

/// A message that originated on the offline network, as forwarded by a relay.
#[derive(Debug, Clone)]
pub struct MeshEvent {
    pub relay_id: String,
    pub message: Message,
}

struct RelayEntry {
    info: RelayInfo,
    handle: FrameSender,
}

/// Registry of currently-connected relays plus the mesh ingestion channel.
#[derive(Clone)]
pub struct GatewayManager {
    inner: Arc<Mutex<HashMap<String, RelayEntry>>>,
    mesh_tx: broadcast::Sender<MeshEvent>,
}

impl GatewayManager {
    pub fn new() -> Self {
        let (mesh_tx, _) = broadcast::channel(MESH_EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            mesh_tx,
        }
    }

    /// Record a new relay.  A re-register under the same id replaces the old
    /// entry (the previous connection is presumed dead).
    pub async fn register(
        &self,
        relay_id: &str,
        name: &str,
        capabilities: Vec<String>,
        handle: FrameSender,
    ) -> RelayInfo {
        let now = now_millis();
        let info = RelayInfo {
            relay_id: relay_id.to_string(),
            name: name.to_string(),
            capabilities,
            connected_at: now,
            last_activity: now,
        };
        let mut inner = self.inner.lock().await;
        if inner
            .insert(
                relay_id.to_string(),
                RelayEntry {
                    info: info.clone(),
                    handle,
                },
            )
            .is_some()
        {
            xlog!(
                "gateway: relay {} re-registered, replacing stale entry",
                crate::logging::relay_id(relay_id)
            );
        } else {
            xlog!("gateway: relay {} connected", crate::logging::relay_id(relay_id));
        }
        info
    }

    /// Normal disconnect path.  Returns whether the relay was registered.
    pub async fn unregister(&self, relay_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.remove(relay_id).is_some();
        if removed {
            xlog!("gateway: relay {} disconnected", crate::logging::relay_id(relay_id));
        }
        removed
    }

    /// Whether offline delivery is possible at all.  This single boolean
    /// gates the routing facade's mesh-injection decision.
    pub async fn has_connected_relay(&self) -> bool {
        !self.inner.lock().await.is_empty()
    }

    /// Best-effort send of one message to one relay.  Returns `false`
    /// without error if the relay is unknown or its connection is no longer
    /// writable; refreshes the relay's last-activity timestamp on success.
    pub async fn inject_message(&self, relay_id: &str, message: &Message) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.get_mut(relay_id) else {
            return false;
        };
        let frame = ServerFrame::InjectMessage {
            message: message.clone(),
        };
        if entry.handle.send(Outbound::Frame(frame)).is_err() {
            return false;
        }
        entry.info.last_activity = now_millis();
        true
    }

    /// Inject into every registered relay; returns how many accepted.
    pub async fn broadcast_to_relays(&self, message: &Message) -> usize {
        let ids: Vec<String> = {
            let inner = self.inner.lock().await;
            inner.keys().cloned().collect()
        };
        let mut delivered = 0;
        for relay_id in ids {
            if self.inject_message(&relay_id, message).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Ingestion hook for messages a relay forwards from the offline
    /// network.  Refreshes relay activity and notifies all subscribers.
    pub async fn on_mesh_message(&self, relay_id: &str, message: Message) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(entry) = inner.get_mut(relay_id) {
                entry.info.last_activity = now_millis();
            }
        }
        // No subscribers is a valid state (nothing to fan out to yet).
        let _ = self.mesh_tx.send(MeshEvent {
            relay_id: relay_id.to_string(),
            message,
        });
    }

    /// Subscribe to mesh-origin messages.
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.mesh_tx.subscribe()
    }

    /// Administrative disconnect: best-effort notify, then close the
    /// underlying connection.  The relay is removed regardless of whether
    /// the notification went through.  Returns whether it was registered.
    pub async fn force_disconnect(&self, relay_id: &str, reason: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.remove(relay_id) else {
            return false;
        };
        let _ = entry.handle.send(Outbound::Frame(ServerFrame::AdminDisconnect {
            reason: reason.to_string(),
        }));
        let _ = entry.handle.send(Outbound::Close);
        xlog!(
            "gateway: relay {} force-disconnected ({})",
            crate::logging::relay_id(relay_id),
            reason
        );
        true
    }

    /// Descriptors for all registered relays, sorted by id.
    pub async fn relays(&self) -> Vec<RelayInfo> {
        let inner = self.inner.lock().await;
        let mut relays: Vec<RelayInfo> = inner.values().map(|e| e.info.clone()).collect();
        relays.sort_by(|a, b| a.relay_id.cmp(&b.relay_id));
        relays
    }

    pub async fn relay_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl Default for GatewayManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Origin;
    use tokio::sync::mpsc;

    fn test_message() -> Message {
        Message {
            id: "m1".to_string(),
            channel_id: "chan".to_string(),
            sender_id: "alice".to_string(),
            sender_name: "Alice".to_string(),
            content: "hi".to_string(),
            timestamp: 1,
            origin: Origin::Online,
            recipient_id: None,
            recipient_name: None,
        }
    }

    #[tokio::test]
    async fn test_inject_delivers_and_updates_activity() {
        let gateway = GatewayManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let info = gateway.register("r1", "Relay One", vec![], tx).await;

        assert!(gateway.inject_message("r1", &test_message()).await);
        match rx.recv().await {
            Some(Outbound::Frame(ServerFrame::InjectMessage { message })) => {
                assert_eq!(message.id, "m1");
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
        let relays = gateway.relays().await;
        assert!(relays[0].last_activity >= info.connected_at);
    }

    #[tokio::test]
    async fn test_inject_to_dead_connection_returns_false() {
        let gateway = GatewayManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        gateway.register("r1", "Relay One", vec![], tx).await;
        drop(rx);
        assert!(!gateway.inject_message("r1", &test_message()).await);
    }

    #[tokio::test]
    async fn test_broadcast_counts_only_successes() {
        let gateway = GatewayManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        gateway.register("r1", "alive", vec![], tx1).await;
        gateway.register("r2", "dead", vec![], tx2).await;
        drop(rx2);

        assert_eq!(gateway.broadcast_to_relays(&test_message()).await, 1);
        assert!(rx1.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_force_disconnect_notifies_then_closes() {
        let gateway = GatewayManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.register("r1", "Relay One", vec![], tx).await;

        assert!(gateway.force_disconnect("r1", "maintenance").await);
        assert!(!gateway.has_connected_relay().await);

        match rx.recv().await {
            Some(Outbound::Frame(ServerFrame::AdminDisconnect { reason })) => {
                assert_eq!(reason, "maintenance");
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(Outbound::Close)));
    }

    #[tokio::test]
    async fn test_mesh_messages_reach_subscribers() {
        let gateway = GatewayManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        gateway.register("r1", "Relay One", vec![], tx).await;

        let mut events = gateway.subscribe();
        gateway.on_mesh_message("r1", test_message()).await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.relay_id, "r1");
        assert_eq!(event.message.id, "m1");
    }
}
