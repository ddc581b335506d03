//! Service-level tests for the smart-send routing facade and the gateway
//! bridge, exercised against isolated service instances.

use crosswire::channels::fingerprint_of;
use crosswire::connections::Outbound;
use crosswire::protocol::{ChannelKind, Origin, ServerFrame, Visibility};
use crosswire::routing::{RouteError, SmartSendRequest};
use crosswire::server::config::Config;
use crosswire::server::state::{build_state, AppState};
use tokio::sync::mpsc;

fn send_request(channel_id: &str, content: &str, mesh_only: bool) -> SmartSendRequest {
    SmartSendRequest {
        channel_id: channel_id.to_string(),
        content: content.to_string(),
        mesh_only,
        recipient_id: None,
        recipient_name: None,
    }
}

async fn state_with_general() -> (AppState, String) {
    let state = build_state(Config::default());
    let channel = state
        .channels
        .create(
            "general",
            ChannelKind::Broadcast,
            "system",
            None,
            Visibility::Public,
            false,
        )
        .await;
    (state, channel.id)
}

#[tokio::test]
async fn smart_send_resolves_name_and_degrades_without_relay() {
    let (state, channel_id) = state_with_general().await;

    let outcome = state
        .router
        .smart_send("alice", "Alice", send_request("general", "hi", false))
        .await
        .expect("send succeeds");

    assert!(!outcome.mesh_injected);
    assert_eq!(outcome.relay_count, 0);
    assert_eq!(outcome.message.origin, Origin::Online);
    // The bare name resolved to the canonical identifier.
    assert_eq!(outcome.message.channel_id, channel_id);

    let stored = state.messages.get_for_channel(&channel_id, 10, None).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "hi");
}

#[tokio::test]
async fn smart_send_injects_when_relay_connected() {
    let (state, channel_id) = state_with_general().await;

    let (tx, mut relay_rx) = mpsc::unbounded_channel();
    state.gateway.register("r1", "Bridge", vec![], tx).await;

    let outcome = state
        .router
        .smart_send("alice", "Alice", send_request("general", "over the bridge", false))
        .await
        .expect("send succeeds");

    assert!(outcome.mesh_injected);
    assert_eq!(outcome.relay_count, 1);
    assert_eq!(outcome.message.origin, Origin::OnlineMesh);

    match relay_rx.recv().await {
        Some(Outbound::Frame(ServerFrame::InjectMessage { message })) => {
            assert_eq!(message.id, outcome.message.id);
            assert_eq!(message.channel_id, channel_id);
        }
        other => panic!("relay expected inject_message, got {other:?}"),
    }

    // Unregistering mid-flight degrades to online-only, without error.
    state.gateway.unregister("r1").await;
    let outcome = state
        .router
        .smart_send("alice", "Alice", send_request("general", "again", false))
        .await
        .expect("send succeeds");
    assert!(!outcome.mesh_injected);
    assert_eq!(outcome.relay_count, 0);
}

#[tokio::test]
async fn smart_send_mesh_only_skips_injection() {
    let (state, _) = state_with_general().await;

    let (tx, mut relay_rx) = mpsc::unbounded_channel();
    state.gateway.register("r1", "Bridge", vec![], tx).await;

    let outcome = state
        .router
        .smart_send("alice", "Alice", send_request("general", "stay online", true))
        .await
        .expect("send succeeds");

    assert!(!outcome.mesh_injected);
    assert_eq!(outcome.relay_count, 0);
    assert_eq!(outcome.message.origin, Origin::Online);
    assert!(relay_rx.try_recv().is_err());
}

#[tokio::test]
async fn smart_send_fails_cleanly_on_unknown_channel() {
    let state = build_state(Config::default());
    let result = state
        .router
        .smart_send("alice", "Alice", send_request("nowhere", "lost", false))
        .await;
    assert!(matches!(result, Err(RouteError::ChannelNotFound(_))));
    assert_eq!(state.messages.count().await, 0);
}

#[tokio::test]
async fn smart_send_accepts_canonical_id_directly() {
    let (state, channel_id) = state_with_general().await;
    let outcome = state
        .router
        .smart_send("alice", "Alice", send_request(&channel_id, "by id", false))
        .await
        .expect("send succeeds");
    assert_eq!(outcome.message.channel_id, channel_id);
}

#[tokio::test]
async fn fingerprint_round_trips_for_every_created_channel() {
    let state = build_state(Config::default());
    for i in 0..50 {
        let channel = state
            .channels
            .create(
                &format!("chan-{i}"),
                ChannelKind::Group,
                "creator",
                None,
                Visibility::Public,
                false,
            )
            .await;
        let resolved = state
            .channels
            .get_by_fingerprint(fingerprint_of(&channel.id))
            .await
            .expect("fingerprint resolves");
        assert_eq!(resolved.id, channel.id);
    }
}

#[tokio::test]
async fn mesh_events_fan_out_to_subscribed_connections() {
    let (state, channel_id) = state_with_general().await;
    state.connections.spawn_mesh_fanout();

    // A live connection authenticated as a regular user, auto-subscribed
    // to the broadcast channel.
    let (tx, mut client_rx) = mpsc::unbounded_channel();
    let conn_id = state.connections.register_connection(tx).await;
    state
        .connections
        .handle_frame(
            conn_id,
            crosswire::protocol::ClientFrame::Auth {
                user_id: "alice".to_string(),
                user_name: "Alice".to_string(),
                is_relay: false,
                relay_id: None,
            },
        )
        .await;

    // Drain the auth_ok and presence_update frames.
    while let Ok(frame) = client_rx.try_recv() {
        drop(frame);
    }

    let message = state
        .messages
        .add(
            &channel_id,
            "mesh-user",
            "Mesh User",
            "from the mesh",
            Origin::Mesh,
            None,
            None,
        )
        .await;
    state.gateway.on_mesh_message("r1", message.clone()).await;

    // The fan-out task delivers asynchronously.
    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), client_rx.recv())
        .await
        .expect("fanout within deadline")
        .expect("connection still open");
    match frame {
        Outbound::Frame(ServerFrame::Message { message: received }) => {
            assert_eq!(received.id, message.id);
            assert_eq!(received.origin, Origin::Mesh);
        }
        other => panic!("expected message frame, got {other:?}"),
    }
}
