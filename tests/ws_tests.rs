//! WebSocket protocol tests: auth, chat fan-out, gateway promotion, and
//! mesh-origin ingestion, all against a live server on an ephemeral port.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crosswire::protocol::{ChannelKind, Visibility};
use crosswire::server::config::Config;
use crosswire::server::router::build_router;
use crosswire::server::state::{build_state, AppState};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (SocketAddr, oneshot::Sender<()>, AppState) {
    let state = build_state(Config::default());
    state.connections.spawn_mesh_fanout();
    state
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
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind server");
    let addr = listener.local_addr().expect("server addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (addr, shutdown_tx, state)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/api/ws"))
        .await
        .expect("ws connect");
    ws
}

async fn send_frame(ws: &mut WsClient, frame: Value) {
    ws.send(WsMessage::Text(frame.to_string()))
        .await
        .expect("ws send");
}

/// Read frames until one matches the wanted type, skipping interleaved
/// broadcasts (presence updates arrive between most exchanges).
async fn recv_frame_of_type(ws: &mut WsClient, wanted: &str) -> Value {
    for _ in 0..20 {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame within deadline")
            .expect("socket open")
            .expect("frame ok");
        if let WsMessage::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).expect("frame json");
            if value["type"] == wanted {
                return value;
            }
        }
    }
    panic!("no {wanted} frame within 20 frames");
}

async fn authenticate(ws: &mut WsClient, user_id: &str, user_name: &str, is_relay: bool) -> Value {
    send_frame(
        ws,
        json!({
            "type": "auth",
            "user_id": user_id,
            "user_name": user_name,
            "is_relay": is_relay,
        }),
    )
    .await;
    recv_frame_of_type(ws, "auth_ok").await
}

#[tokio::test]
async fn auth_subscribes_to_broadcast_channels() {
    let (addr, shutdown_tx, _state) = start_server().await;
    let mut ws = connect(addr).await;

    let auth_ok = authenticate(&mut ws, "alice", "Alice", false).await;
    assert_eq!(auth_ok["user_id"], "alice");
    let channels = auth_ok["channels"].as_array().unwrap();
    assert!(channels
        .iter()
        .any(|c| c["name"] == "general" && c["kind"] == "broadcast"));

    // The presence broadcast follows authentication.
    let presence = recv_frame_of_type(&mut ws, "presence_update").await;
    assert!(presence["users"]
        .as_array()
        .unwrap()
        .iter()
        .any(|u| u["user_id"] == "alice" && u["status"] == "online"));

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn unauthenticated_chat_message_is_rejected() {
    let (addr, shutdown_tx, _state) = start_server().await;
    let mut ws = connect(addr).await;

    send_frame(
        &mut ws,
        json!({ "type": "message", "channel_id": "general", "content": "hi" }),
    )
    .await;
    let error = recv_frame_of_type(&mut ws, "error").await;
    assert!(error["error"].as_str().unwrap().contains("authenticated"));

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn chat_messages_fan_out_to_subscribers() {
    let (addr, shutdown_tx, state) = start_server().await;
    let general_id = state.channels.find_by_name("general").await.unwrap().id;

    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    authenticate(&mut alice, "alice", "Alice", false).await;
    authenticate(&mut bob, "bob", "Bob", false).await;

    send_frame(
        &mut alice,
        json!({ "type": "message", "channel_id": general_id, "content": "hello bob" }),
    )
    .await;

    let ack = recv_frame_of_type(&mut alice, "message_ack").await;
    assert!(ack["message_id"].as_str().is_some());

    let received = recv_frame_of_type(&mut bob, "message").await;
    assert_eq!(received["message"]["content"], "hello bob");
    assert_eq!(received["message"]["sender_id"], "alice");
    assert_eq!(received["message"]["origin"], "online");

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn gateway_promotion_and_mesh_ingestion() {
    let (addr, shutdown_tx, state) = start_server().await;
    let general_id = state.channels.find_by_name("general").await.unwrap().id;

    let mut relay = connect(addr).await;
    authenticate(&mut relay, "gw1", "Gateway One", true).await;
    send_frame(
        &mut relay,
        json!({
            "type": "gateway_connect",
            "relay_id": "r1",
            "name": "Field Bridge",
            "capabilities": ["store_and_forward"],
        }),
    )
    .await;
    let connected = recv_frame_of_type(&mut relay, "gateway_connect").await;
    assert_eq!(connected["relay"]["relay_id"], "r1");
    assert!(state.gateway.has_connected_relay().await);

    let mut alice = connect(addr).await;
    authenticate(&mut alice, "alice", "Alice", false).await;

    // A mesh-origin message addressed by channel *name* reaches cloud
    // subscribers with the canonical identifier.
    send_frame(
        &mut relay,
        json!({
            "type": "gateway_message",
            "message": {
                "channel_id": "general",
                "sender_id": "mesh-user",
                "sender_name": "Mesh User",
                "content": "greetings from the mesh",
            },
        }),
    )
    .await;

    let received = recv_frame_of_type(&mut alice, "message").await;
    assert_eq!(received["message"]["content"], "greetings from the mesh");
    assert_eq!(received["message"]["origin"], "mesh");
    assert_eq!(received["message"]["channel_id"], general_id.as_str());

    // A cloud-side chat message is forwarded to the relay for offline
    // delivery.
    send_frame(
        &mut alice,
        json!({ "type": "message", "channel_id": general_id, "content": "back at you" }),
    )
    .await;
    let injected = recv_frame_of_type(&mut relay, "inject_message").await;
    assert_eq!(injected["message"]["content"], "back at you");

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn gateway_message_requires_relay_status() {
    let (addr, shutdown_tx, state) = start_server().await;
    let mut ws = connect(addr).await;
    authenticate(&mut ws, "alice", "Alice", false).await;

    send_frame(
        &mut ws,
        json!({
            "type": "gateway_message",
            "message": {
                "channel_id": "general",
                "sender_id": "mesh-user",
                "sender_name": "Mesh User",
                "content": "sneaky",
            },
        }),
    )
    .await;
    let error = recv_frame_of_type(&mut ws, "error").await;
    assert!(error["error"].as_str().unwrap().contains("gateway"));
    assert_eq!(state.messages.count().await, 0);

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn forced_disconnect_notifies_the_relay() {
    let (addr, shutdown_tx, state) = start_server().await;

    let mut relay = connect(addr).await;
    authenticate(&mut relay, "gw1", "Gateway One", true).await;
    send_frame(
        &mut relay,
        json!({ "type": "gateway_connect", "relay_id": "r1", "name": "Bridge" }),
    )
    .await;
    recv_frame_of_type(&mut relay, "gateway_connect").await;

    assert!(state.gateway.force_disconnect("r1", "maintenance window").await);

    let notice = recv_frame_of_type(&mut relay, "admin_disconnect").await;
    assert_eq!(notice["reason"], "maintenance window");
    assert!(!state.gateway.has_connected_relay().await);

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn disconnect_marks_presence_offline_and_unregisters_relay() {
    let (addr, shutdown_tx, state) = start_server().await;

    let mut relay = connect(addr).await;
    authenticate(&mut relay, "gw1", "Gateway One", true).await;
    send_frame(
        &mut relay,
        json!({ "type": "gateway_connect", "relay_id": "r1", "name": "Bridge" }),
    )
    .await;
    recv_frame_of_type(&mut relay, "gateway_connect").await;
    assert!(state.gateway.has_connected_relay().await);

    relay.close(None).await.expect("close");
    drop(relay);

    // Teardown is immediate once the server observes the close.
    for _ in 0..40 {
        if !state.gateway.has_connected_relay().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!state.gateway.has_connected_relay().await);
    let online = state.presence.get_online().await;
    assert!(online.iter().all(|r| r.user_id != "gw1"));

    shutdown_tx.send(()).ok();
}
