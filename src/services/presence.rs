//! Presence tracking: heartbeats, online status, and friends' liveness.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::FriendPresence;
use crate::repositories::{FocusStore, FriendGraph};

/// True iff `last_seen_at` is at most `window` before `now`. Never-seen users are offline.
pub fn is_online_within(
    last_seen_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    match last_seen_at {
        Some(seen) => now.signed_duration_since(seen) <= window,
        None => false,
    }
}

/// Presence operations over the shared store.
#[derive(Clone)]
pub struct PresenceService {
    store: Arc<dyn FocusStore>,
    friends: Arc<dyn FriendGraph>,
    online_window: Duration,
}

impl PresenceService {
    pub fn new(
        store: Arc<dyn FocusStore>,
        friends: Arc<dyn FriendGraph>,
        online_window: std::time::Duration,
    ) -> Self {
        Self {
            store,
            friends,
            online_window: Duration::from_std(online_window).unwrap_or(Duration::minutes(5)),
        }
    }

    /// Record a liveness ping. The heartbeat row and `last_seen_at` are written together.
    #[instrument(skip(self))]
    pub async fn record_heartbeat(&self, user_id: Uuid) -> AppResult<DateTime<Utc>> {
        let now = Utc::now();
        self.store.record_heartbeat(user_id, now).await?;
        debug!(user_id = %user_id, "heartbeat recorded");
        Ok(now)
    }

    pub fn is_online(&self, last_seen_at: Option<DateTime<Utc>>) -> bool {
        is_online_within(last_seen_at, Utc::now(), self.online_window)
    }

    /// Online status of every friend of `user_id`.
    pub async fn friends_online_status(&self, user_id: Uuid) -> AppResult<Vec<FriendPresence>> {
        let friends = self.friends.friends_of(user_id).await?;
        if friends.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let seen = self.store.last_seen(&friends).await?;
        Ok(seen
            .into_iter()
            .map(|(friend_user_id, last_seen_at)| FriendPresence {
                friend_user_id,
                is_online: is_online_within(last_seen_at, now, self.online_window),
                last_seen_at,
            })
            .collect())
    }

    /// Ids of the friends of `user_id` that are currently online.
    pub async fn online_friends(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        Ok(self
            .friends_online_status(user_id)
            .await?
            .into_iter()
            .filter(|f| f.is_online)
            .map(|f| f.friend_user_id)
            .collect())
    }
}
