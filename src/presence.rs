//! Per-user online/offline state with a staleness window.
//!
//! Staleness is computed lazily at read time rather than by a background
//! timer: a crashed connection that never sent an explicit offline event
//! still ages out of `get_online` once its last-seen time falls outside the
//! window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::protocol::now_millis;

/// Default window after which a silent record is treated as offline.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(60);

/// Offline records older than this multiple of the stale timeout are purged
/// by [`PresenceTracker::cleanup`].
const CLEANUP_MULTIPLIER: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// Which transport a user was last seen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Online,
    Mesh,
    Gateway,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PresenceRecord {
    pub user_id: String,
    pub user_name: String,
    pub status: PresenceStatus,
    /// Milliseconds since the UNIX epoch.
    pub last_seen: u64,
    pub connection_type: ConnectionType,
}

#[derive(Clone)]
pub struct PresenceConfig {
    pub stale_timeout: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            stale_timeout: DEFAULT_STALE_TIMEOUT,
        }
    }
}

/// Tracks who is reachable, and over which transport.
#[derive(Clone)]
pub struct PresenceTracker {
    config: PresenceConfig,
    inner: Arc<Mutex<HashMap<String, PresenceRecord>>>,
}

impl PresenceTracker {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Upsert a record, always refreshing `last_seen`.
    pub async fn update(
        &self,
        user_id: &str,
        user_name: &str,
        status: PresenceStatus,
        connection_type: ConnectionType,
    ) -> PresenceRecord {
        let record = PresenceRecord {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            status,
            last_seen: now_millis(),
            connection_type,
        };
        let mut inner = self.inner.lock().await;
        inner.insert(user_id.to_string(), record.clone());
        record
    }

    /// Flip a user offline without removing the record.  No-op for unknown
    /// users.
    pub async fn set_offline(&self, user_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.get_mut(user_id) {
            record.status = PresenceStatus::Offline;
        }
    }

    /// Records that are both not explicitly offline and fresh within the
    /// stale window.
    pub async fn get_online(&self) -> Vec<PresenceRecord> {
        let now = now_millis();
        let window = self.config.stale_timeout.as_millis() as u64;
        let inner = self.inner.lock().await;
        let mut online: Vec<PresenceRecord> = inner
            .values()
            .filter(|r| r.status != PresenceStatus::Offline)
            .filter(|r| now.saturating_sub(r.last_seen) < window)
            .cloned()
            .collect();
        online.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        online
    }

    /// Snapshot of every record, sorted by user id.
    pub async fn get_all(&self) -> Vec<PresenceRecord> {
        let inner = self.inner.lock().await;
        let mut all: Vec<PresenceRecord> = inner.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }

    /// Purge records that have been offline for ten times the stale timeout.
    /// Maintenance only; `get_online` is correct without it.
    pub async fn cleanup(&self) -> usize {
        let now = now_millis();
        let horizon =
            (self.config.stale_timeout * CLEANUP_MULTIPLIER).as_millis() as u64;
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|_, r| {
            r.status != PresenceStatus::Offline || now.saturating_sub(r.last_seen) < horizon
        });
        before - inner.len()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}
