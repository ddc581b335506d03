//! Append-bounded, per-channel ordered message storage.
//!
//! Each channel keeps an insertion-ordered index of message ids with a fixed
//! cap; when the cap is exceeded the oldest entry is pruned.  Clearing a
//! channel removes its stored messages and records a tombstone timestamp,
//! which reconnecting clients use to purge locally-cached copies older than
//! the last clear.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::protocol::{derive_message_id, now_millis, Message, Origin};
use crate::xlog;

/// Default per-channel message cap.
pub const DEFAULT_CHANNEL_CAP: usize = 1000;

/// Error types for log mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    NotFound(String),
    Forbidden(String),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::NotFound(id) => write!(f, "message not found: {}", id),
            MessageError::Forbidden(detail) => write!(f, "forbidden: {}", detail),
        }
    }
}

impl std::error::Error for MessageError {}

#[derive(Clone)]
pub struct MessageLogConfig {
    pub max_per_channel: usize,
    /// Identity allowed to delete any message, not just its own.
    pub admin_user_id: String,
}

impl Default for MessageLogConfig {
    fn default() -> Self {
        Self {
            max_per_channel: DEFAULT_CHANNEL_CAP,
            admin_user_id: "admin".to_string(),
        }
    }
}

struct LogInner {
    messages: HashMap<String, Message>,
    /// Per-channel insertion-ordered message ids, oldest first.
    order: HashMap<String, VecDeque<String>>,
    cleared_at: HashMap<String, u64>,
    seq: u64,
}

/// In-memory message store, owned per channel.
#[derive(Clone)]
pub struct MessageLog {
    config: MessageLogConfig,
    inner: Arc<Mutex<LogInner>>,
}

impl MessageLog {
    pub fn new(config: MessageLogConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(LogInner {
                messages: HashMap::new(),
                order: HashMap::new(),
                cleared_at: HashMap::new(),
                seq: 0,
            })),
        }
    }

    /// Create and store a message, pruning the oldest entry if the channel
    /// cap is exceeded.  Always succeeds.
    #[allow(clippy::too_many_arguments)]
    pub async fn add(
        &self,
        channel_id: &str,
        sender_id: &str,
        sender_name: &str,
        content: &str,
        origin: Origin,
        recipient_id: Option<String>,
        recipient_name: Option<String>,
    ) -> Message {
        let mut inner = self.inner.lock().await;
        inner.seq += 1;
        let timestamp = now_millis();
        let id = derive_message_id(channel_id, sender_id, timestamp, inner.seq, content);
        let message = Message {
            id: id.clone(),
            channel_id: channel_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            content: content.to_string(),
            timestamp,
            origin,
            recipient_id,
            recipient_name,
        };

        inner.messages.insert(id.clone(), message.clone());
        let queue = inner.order.entry(channel_id.to_string()).or_default();
        queue.push_back(id);
        let mut evicted_ids = Vec::new();
        while queue.len() > self.config.max_per_channel {
            if let Some(evicted) = queue.pop_front() {
                evicted_ids.push(evicted);
            }
        }
        for evicted in evicted_ids {
            inner.messages.remove(&evicted);
        }
        message
    }

    /// Lookup by message id.
    pub async fn get(&self, message_id: &str) -> Option<Message> {
        let inner = self.inner.lock().await;
        inner.messages.get(message_id).cloned()
    }

    /// Up to `limit` messages for a channel, oldest-to-newest.
    ///
    /// With `before` set, only messages strictly older than the cursor are
    /// considered; the most recent `limit` of those are returned, so callers
    /// paginate backwards by passing the timestamp of the oldest message they
    /// already hold.
    pub async fn get_for_channel(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<u64>,
    ) -> Vec<Message> {
        let inner = self.inner.lock().await;
        let Some(queue) = inner.order.get(channel_id) else {
            return Vec::new();
        };
        let matching: Vec<&Message> = queue
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| before.map_or(true, |cursor| m.timestamp < cursor))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Remove all stored messages for a channel and record the tombstone.
    /// Returns the tombstone timestamp.
    pub async fn clear_channel(&self, channel_id: &str) -> u64 {
        let mut inner = self.inner.lock().await;
        let removed: Vec<String> = inner
            .order
            .entry(channel_id.to_string())
            .or_default()
            .drain(..)
            .collect();
        let count = removed.len();
        for id in removed {
            inner.messages.remove(&id);
        }
        let cleared = now_millis();
        inner.cleared_at.insert(channel_id.to_string(), cleared);
        xlog!(
            "log: cleared {} ({} message(s))",
            crate::logging::chan_id(channel_id),
            count
        );
        cleared
    }

    /// Snapshot of every known channel's last-clear time, zero if never
    /// cleared.  This is the reconnection-sync primitive.
    pub async fn get_all_clear_timestamps(&self) -> HashMap<String, u64> {
        let inner = self.inner.lock().await;
        inner
            .order
            .keys()
            .chain(inner.cleared_at.keys())
            .map(|id| {
                (
                    id.clone(),
                    inner.cleared_at.get(id).copied().unwrap_or(0),
                )
            })
            .collect()
    }

    /// Delete a single message.  Authorized to the original sender or the
    /// configured admin identity; returns the removed message.
    pub async fn delete_message(
        &self,
        message_id: &str,
        requester_id: &str,
    ) -> Result<Message, MessageError> {
        let mut inner = self.inner.lock().await;
        match inner.messages.get(message_id) {
            None => return Err(MessageError::NotFound(message_id.to_string())),
            Some(m)
                if m.sender_id != requester_id && requester_id != self.config.admin_user_id =>
            {
                return Err(MessageError::Forbidden(
                    "only the sender or an administrator may delete a message".to_string(),
                ))
            }
            Some(_) => {}
        }
        let message = match inner.messages.remove(message_id) {
            Some(m) => m,
            None => return Err(MessageError::NotFound(message_id.to_string())),
        };
        if let Some(queue) = inner.order.get_mut(&message.channel_id) {
            queue.retain(|id| id != message_id);
        }
        Ok(message)
    }

    /// Total stored messages across all channels.
    pub async fn count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.messages.len()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(MessageLogConfig::default())
    }
}
