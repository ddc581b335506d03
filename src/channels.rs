//! Channel identity registry: membership, visibility, and access control.
//!
//! The registry is the canonical source of truth for channel identity.  Every
//! channel carries two addresses: its canonical identifier (a hyphenated
//! UUID) used by the cloud transport, and a derived 15-bit fingerprint used
//! by the offline transport, which addresses channels with a 2-byte on-wire
//! field.  The fingerprint is a pure function of the identifier and is never
//! stored independently of being derivable.
//!
//! Access control is evaluated from first principles on every check rather
//! than cached: channel counts are small, and correctness under concurrent
//! membership edits matters more than lookup speed.
//!
//! Channels are soft-deleted.  The deleted filter is enforced here, at the
//! registry boundary: `get`, `get_by_fingerprint`, `find_by_name`, listing,
//! and subscription all skip deleted channels, so callers never have to
//! remember to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::protocol::{now_millis, ChannelKind, ChannelSummary, Visibility};
use crate::xlog;

/// Error types for registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    NotFound(String),
    Forbidden(String),
    Conflict(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::NotFound(id) => write!(f, "channel not found: {}", id),
            ChannelError::Forbidden(detail) => write!(f, "forbidden: {}", detail),
            ChannelError::Conflict(detail) => write!(f, "conflict: {}", detail),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Where a user stands with respect to a channel's access rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Granted,
    Pending,
    CanRequest,
    Denied,
}

/// A channel and its access-control state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Channel {
    pub id: String,
    /// 15-bit fingerprint derived from `id`; the offline transport's address.
    pub fingerprint: u16,
    pub name: String,
    pub kind: ChannelKind,
    pub visibility: Visibility,
    pub creator_id: String,
    pub members: HashSet<String>,
    /// Explicit allow list; consulted only when visibility is `restricted`.
    pub allowed: HashSet<String>,
    pub blocked: HashSet<String>,
    pub pending_requests: HashSet<String>,
    pub requires_approval: bool,
    pub archived: bool,
    pub deleted: bool,
    pub created_at: u64,
}

impl Channel {
    pub fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
        }
    }
}

/// Compute the 15-bit mesh fingerprint for a channel identifier.
///
/// A rolling 31x hash over the identifier bytes, masked to 15 bits so the
/// value is non-negative and fits the offline transport's 2-byte field.
pub fn fingerprint_of(id: &str) -> u16 {
    let hash: u32 = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    (hash & 0x7FFF) as u16
}

struct RegistryInner {
    channels: HashMap<String, Channel>,
    by_fingerprint: HashMap<u16, String>,
}

/// Canonical source of truth for channel identity and access rules.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                channels: HashMap::new(),
                by_fingerprint: HashMap::new(),
            })),
        }
    }

    /// Create a channel: assigns the identifier and fingerprint and registers
    /// both indexes.  Initial membership defaults to the creator.  Always
    /// succeeds.
    pub async fn create(
        &self,
        name: &str,
        kind: ChannelKind,
        creator_id: &str,
        member_ids: Option<Vec<String>>,
        visibility: Visibility,
        requires_approval: bool,
    ) -> Channel {
        let id = Uuid::new_v4().to_string();
        let fingerprint = fingerprint_of(&id);
        let members: HashSet<String> = member_ids
            .unwrap_or_else(|| vec![creator_id.to_string()])
            .into_iter()
            .collect();

        let channel = Channel {
            id: id.clone(),
            fingerprint,
            name: name.to_string(),
            kind,
            visibility,
            creator_id: creator_id.to_string(),
            members,
            allowed: HashSet::new(),
            blocked: HashSet::new(),
            pending_requests: HashSet::new(),
            requires_approval,
            archived: false,
            deleted: false,
            created_at: now_millis(),
        };

        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.by_fingerprint.insert(fingerprint, id.clone()) {
            xlog!(
                "registry: fingerprint {} collision, {} displaces {}",
                fingerprint,
                crate::logging::chan_id(&id),
                crate::logging::chan_id(&existing)
            );
        }
        inner.channels.insert(id, channel.clone());
        channel
    }

    /// Identifier-indexed lookup.  Deleted channels are invisible.
    pub async fn get(&self, id: &str) -> Option<Channel> {
        let inner = self.inner.lock().await;
        inner.channels.get(id).filter(|c| !c.deleted).cloned()
    }

    /// Fingerprint-indexed lookup.  Deleted channels are invisible.
    pub async fn get_by_fingerprint(&self, fingerprint: u16) -> Option<Channel> {
        let inner = self.inner.lock().await;
        let id = inner.by_fingerprint.get(&fingerprint)?;
        inner.channels.get(id).filter(|c| !c.deleted).cloned()
    }

    /// Case-insensitive name scan over non-deleted channels.  Used to resolve
    /// offline-transport messages, which address channels by human name.
    pub async fn find_by_name(&self, name: &str) -> Option<Channel> {
        let inner = self.inner.lock().await;
        inner
            .channels
            .values()
            .find(|c| !c.deleted && c.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Whether `user_id` may read and post in `channel`.
    ///
    /// The creator always passes; a blocked user never does.  Public
    /// broadcast channels are open to everyone, public direct-message
    /// channels require membership, and other public kinds are open unless a
    /// member list restricts them.  Private requires membership; restricted
    /// requires the allow list.
    pub fn can_access(channel: &Channel, user_id: &str) -> bool {
        if channel.creator_id == user_id {
            return true;
        }
        if channel.blocked.contains(user_id) {
            return false;
        }
        match channel.visibility {
            Visibility::Public => match channel.kind {
                ChannelKind::Broadcast => true,
                ChannelKind::DirectMessage => channel.members.contains(user_id),
                _ => channel.members.is_empty() || channel.members.contains(user_id),
            },
            Visibility::Private => channel.members.contains(user_id),
            Visibility::Restricted => channel.allowed.contains(user_id),
        }
    }

    /// Broader than [`Self::can_access`]: also true when the channel is
    /// public, or discoverable-by-request (private + approval flow) and the
    /// user is not blocked.
    pub fn can_see_in_listing(channel: &Channel, user_id: &str) -> bool {
        if Self::can_access(channel, user_id) {
            return true;
        }
        match channel.visibility {
            Visibility::Public => true,
            Visibility::Private => {
                channel.requires_approval && !channel.blocked.contains(user_id)
            }
            Visibility::Restricted => false,
        }
    }

    /// File an access request on a private, approval-gated channel.
    pub async fn request_access(&self, channel_id: &str, user_id: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        let channel = live_channel_mut(&mut inner, channel_id)?;
        if channel.visibility != Visibility::Private || !channel.requires_approval {
            return Err(ChannelError::Conflict(
                "channel does not accept access requests".to_string(),
            ));
        }
        if channel.blocked.contains(user_id) {
            return Err(ChannelError::Forbidden("user is blocked".to_string()));
        }
        if Self::can_access(channel, user_id) {
            return Err(ChannelError::Conflict("access already granted".to_string()));
        }
        if !channel.pending_requests.insert(user_id.to_string()) {
            return Err(ChannelError::Conflict("request already pending".to_string()));
        }
        Ok(())
    }

    /// Approve or reject a pending access request.  Creator-only.
    pub async fn respond_to_access_request(
        &self,
        channel_id: &str,
        requester_id: &str,
        manager_id: &str,
        approve: bool,
    ) -> Result<Channel, ChannelError> {
        let mut inner = self.inner.lock().await;
        let channel = live_channel_mut(&mut inner, channel_id)?;
        require_creator(channel, manager_id)?;
        if !channel.pending_requests.remove(requester_id) {
            return Err(ChannelError::Conflict("no pending request".to_string()));
        }
        if approve {
            channel.members.insert(requester_id.to_string());
        }
        Ok(channel.clone())
    }

    /// Grant or revoke a user's standing on a managed channel.  Creator-only.
    ///
    /// Granting adds to the allow list and clears any block; revoking blocks
    /// the user and strips both allow-list entry and membership.
    pub async fn update_user_access(
        &self,
        channel_id: &str,
        user_id: &str,
        manager_id: &str,
        allow: bool,
    ) -> Result<Channel, ChannelError> {
        let mut inner = self.inner.lock().await;
        let channel = live_channel_mut(&mut inner, channel_id)?;
        require_creator(channel, manager_id)?;
        if allow {
            channel.allowed.insert(user_id.to_string());
            channel.blocked.remove(user_id);
        } else {
            channel.blocked.insert(user_id.to_string());
            channel.allowed.remove(user_id);
            channel.members.remove(user_id);
        }
        Ok(channel.clone())
    }

    /// Change visibility (and optionally the approval flag).  Creator-only.
    pub async fn update_visibility(
        &self,
        channel_id: &str,
        manager_id: &str,
        visibility: Visibility,
        requires_approval: Option<bool>,
    ) -> Result<Channel, ChannelError> {
        let mut inner = self.inner.lock().await;
        let channel = live_channel_mut(&mut inner, channel_id)?;
        require_creator(channel, manager_id)?;
        channel.visibility = visibility;
        if let Some(flag) = requires_approval {
            channel.requires_approval = flag;
        }
        Ok(channel.clone())
    }

    /// Where `user_id` stands with respect to `channel_id`.
    pub async fn get_access_status(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Option<AccessStatus> {
        let channel = self.get(channel_id).await?;
        if Self::can_access(&channel, user_id) {
            return Some(AccessStatus::Granted);
        }
        if channel.pending_requests.contains(user_id) {
            return Some(AccessStatus::Pending);
        }
        if channel.visibility == Visibility::Private
            && channel.requires_approval
            && !channel.blocked.contains(user_id)
        {
            return Some(AccessStatus::CanRequest);
        }
        Some(AccessStatus::Denied)
    }

    /// The auto-join step performed at authentication time.
    ///
    /// Every non-deleted broadcast channel gains the user as a member as a
    /// side effect and is included in the result; every other channel is
    /// included only if the user is already a member.  Returns the full set
    /// of channel identifiers the user should be live-subscribed to.
    pub async fn subscribe_user_to_channels(&self, user_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let mut subscribed = Vec::new();
        for channel in inner.channels.values_mut() {
            if channel.deleted {
                continue;
            }
            if channel.kind == ChannelKind::Broadcast {
                channel.members.insert(user_id.to_string());
                subscribed.push(channel.id.clone());
            } else if channel.members.contains(user_id) {
                subscribed.push(channel.id.clone());
            }
        }
        subscribed
    }

    /// Summaries for a set of channel ids, in the given order.  Deleted or
    /// unknown ids are skipped.
    pub async fn summaries(&self, ids: &[String]) -> Vec<ChannelSummary> {
        let inner = self.inner.lock().await;
        ids.iter()
            .filter_map(|id| inner.channels.get(id))
            .filter(|c| !c.deleted)
            .map(Channel::summary)
            .collect()
    }

    /// Add a member.  Idempotent; returns whether membership changed.
    pub async fn add_member(&self, channel_id: &str, user_id: &str) -> Result<bool, ChannelError> {
        let mut inner = self.inner.lock().await;
        let channel = live_channel_mut(&mut inner, channel_id)?;
        Ok(channel.members.insert(user_id.to_string()))
    }

    /// Remove a member.  Idempotent; returns whether membership changed.
    pub async fn remove_member(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<bool, ChannelError> {
        let mut inner = self.inner.lock().await;
        let channel = live_channel_mut(&mut inner, channel_id)?;
        Ok(channel.members.remove(user_id))
    }

    /// Exclude a channel from default listings.  Creator-only, idempotent.
    pub async fn archive(&self, channel_id: &str, manager_id: &str) -> Result<Channel, ChannelError> {
        let mut inner = self.inner.lock().await;
        let channel = live_channel_mut(&mut inner, channel_id)?;
        require_creator(channel, manager_id)?;
        channel.archived = true;
        Ok(channel.clone())
    }

    /// Soft-delete: flagged, never physically removed.  Creator-only,
    /// idempotent.
    pub async fn delete(&self, channel_id: &str, manager_id: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        let channel = live_channel_mut(&mut inner, channel_id)?;
        require_creator(channel, manager_id)?;
        channel.deleted = true;
        Ok(())
    }

    /// Channels `user_id` can see in a listing: non-deleted, visible per
    /// [`Self::can_see_in_listing`], and non-archived unless requested.
    pub async fn list_for_user(&self, user_id: &str, include_archived: bool) -> Vec<Channel> {
        let inner = self.inner.lock().await;
        let mut channels: Vec<Channel> = inner
            .channels
            .values()
            .filter(|c| !c.deleted)
            .filter(|c| include_archived || !c.archived)
            .filter(|c| Self::can_see_in_listing(c, user_id))
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        channels
    }

    /// Pending access requests for a channel.  Creator-only.
    pub async fn pending_requests(
        &self,
        channel_id: &str,
        manager_id: &str,
    ) -> Result<Vec<String>, ChannelError> {
        let mut inner = self.inner.lock().await;
        let channel = live_channel_mut(&mut inner, channel_id)?;
        require_creator(channel, manager_id)?;
        let mut pending: Vec<String> = channel.pending_requests.iter().cloned().collect();
        pending.sort();
        Ok(pending)
    }

    /// Number of live (non-deleted) channels.
    pub async fn count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.channels.values().filter(|c| !c.deleted).count()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn live_channel_mut<'a>(
    inner: &'a mut RegistryInner,
    channel_id: &str,
) -> Result<&'a mut Channel, ChannelError> {
    inner
        .channels
        .get_mut(channel_id)
        .filter(|c| !c.deleted)
        .ok_or_else(|| ChannelError::NotFound(channel_id.to_string()))
}

fn require_creator(channel: &Channel, manager_id: &str) -> Result<(), ChannelError> {
    if channel.creator_id != manager_id {
        return Err(ChannelError::Forbidden(
            "only the channel creator may do this".to_string(),
        ));
    }
    Ok(())
}
