//! HTTP + WebSocket surface for the dual-transport messaging service.
//!
//! Terminates the cloud-side persistent connections, exposes the control
//! API used by out-of-scope request handlers, and wires the service graph
//! together at startup.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod utils;

use clap::Parser;

use crate::protocol::{ChannelKind, Visibility};
use crate::xlog;

use config::{Cli, Config, DEFAULT_CHANNEL_NAME};
use state::build_state;

/// Entry point: parse CLI, assemble the service graph, start serving.
pub async fn run() {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);

    crate::logging::init();

    xlog!("crosswire starting");
    xlog!(
        "  admin identity: {}",
        crate::logging::user_id(&config.admin_user_id)
    );
    xlog!(
        "  presence stale timeout: {}s",
        config.stale_timeout.as_secs()
    );
    xlog!("  per-channel message cap: {}", config.message_cap);

    let state = build_state(config.clone());

    // Fan mesh-origin messages out to subscribed cloud connections.
    state.connections.spawn_mesh_fanout();

    // Seed the default broadcast channel so a fresh server is immediately
    // usable and name-addressable from the mesh side.
    let general = state
        .channels
        .create(
            DEFAULT_CHANNEL_NAME,
            ChannelKind::Broadcast,
            "system",
            None,
            Visibility::Public,
            false,
        )
        .await;
    xlog!(
        "  default channel: {} ({})",
        DEFAULT_CHANNEL_NAME,
        crate::logging::chan_id(&general.id)
    );

    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    xlog!("crosswire listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await.expect("server error");
}
