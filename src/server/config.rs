//! Configuration types and constants for the crosswire server.

use std::time::Duration;

use clap::Parser;

use crate::message_log::DEFAULT_CHANNEL_CAP;
use crate::presence::DEFAULT_STALE_TIMEOUT;

pub(crate) const MAX_WS_CONNECTIONS: usize = 256;
pub(crate) const DEFAULT_BIND: &str = "127.0.0.1:4000";
pub(crate) const DEFAULT_ADMIN_USER: &str = "admin";
pub(crate) const DEFAULT_CHANNEL_NAME: &str = "general";

/// Messaging server bridging cloud clients and offline mesh gateways.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(name = "crosswire", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: CROSSWIRE_BIND] [default: 127.0.0.1:4000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Identity allowed to delete any message and manage relays
    /// [env: CROSSWIRE_ADMIN] [default: admin]
    #[arg(long)]
    pub admin: Option<String>,

    /// Presence staleness window in seconds [env: CROSSWIRE_STALE_TIMEOUT]
    /// [default: 60]
    #[arg(long)]
    pub stale_timeout: Option<u64>,

    /// Per-channel message cap [env: CROSSWIRE_MESSAGE_CAP] [default: 1000]
    #[arg(long)]
    pub message_cap: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub admin_user_id: String,
    pub stale_timeout: Duration,
    pub message_cap: usize,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("CROSSWIRE_BIND").ok())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let admin_user_id = cli
            .admin
            .or_else(|| std::env::var("CROSSWIRE_ADMIN").ok())
            .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string());

        let stale_timeout = cli
            .stale_timeout
            .or_else(|| {
                std::env::var("CROSSWIRE_STALE_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STALE_TIMEOUT);

        let message_cap = cli
            .message_cap
            .or_else(|| {
                std::env::var("CROSSWIRE_MESSAGE_CAP")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(DEFAULT_CHANNEL_CAP);

        Self {
            bind_addr,
            admin_user_id,
            stale_timeout,
            message_cap,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            admin_user_id: DEFAULT_ADMIN_USER.to_string(),
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            message_cap: DEFAULT_CHANNEL_CAP,
        }
    }
}
