//! Presence payloads.

use serde::{Deserialize, Serialize};

use super::PresenceStatus;
use crate::UserId;

/// Discriminator for [`StatusUpdate`], serialized as `"status_update"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusUpdateTag {
    /// The only value
    #[default]
    StatusUpdate,
}

/// Presence change pushed to every other live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Always `"status_update"` on the wire
    #[serde(rename = "type")]
    pub tag: StatusUpdateTag,
    /// User whose presence changed
    pub user_id: UserId,
    /// New presence
    pub new_status: PresenceStatus,
}

impl StatusUpdate {
    /// Presence update for `user_id`.
    pub fn new(user_id: UserId, new_status: PresenceStatus) -> Self {
        Self { tag: StatusUpdateTag::StatusUpdate, user_id, new_status }
    }
}
