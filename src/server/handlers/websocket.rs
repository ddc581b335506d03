//! WebSocket upgrade and connection handling.

use std::sync::atomic::Ordering;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;

use crate::connections::Outbound;
use crate::protocol::ClientFrame;
use crate::server::config::MAX_WS_CONNECTIONS;
use crate::server::state::AppState;
use crate::server::utils::api_error;
use crate::xlog;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    // Check connection limit before upgrading
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= MAX_WS_CONNECTIONS {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("too many WebSocket connections (max {})", MAX_WS_CONNECTIONS),
        );
    }

    ws.on_upgrade(|socket| ws_connection(socket, state))
        .into_response()
}

async fn ws_connection(mut socket: WebSocket, state: AppState) {
    state.ws_connection_count.fetch_add(1, Ordering::Relaxed);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn_id = state.connections.register_connection(tx).await;

    loop {
        tokio::select! {
            // Drain this connection's outbound queue to the socket.
            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(frame)) => {
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(_) => continue,
                        };
                        if socket.send(WsMessage::Text(text)).await.is_err() {
                            break; // client disconnected
                        }
                    }
                    Some(Outbound::Close) => {
                        let _ = socket.send(WsMessage::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
            // Dispatch incoming frames from the client.
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => state.connections.handle_frame(conn_id, frame).await,
                            Err(e) => {
                                state
                                    .connections
                                    .send_error(conn_id, &format!("malformed frame: {e}"))
                                    .await;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.connections.disconnect(conn_id).await;
    state.ws_connection_count.fetch_sub(1, Ordering::Relaxed);
    xlog!("conn {}: closed", conn_id);
}
