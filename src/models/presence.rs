//! Presence: liveness of users and their friends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Online status of one friend of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendPresence {
    pub friend_user_id: Uuid,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Response of `POST /presence/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub last_seen_at: DateTime<Utc>,
}
