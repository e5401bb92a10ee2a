//! Storage seam: the relational store holding all coordination state, and the
//! friend graph owned by the friends module.
//!
//! The server keeps no in-process session state; every service goes through a
//! [`FocusStore`]. [`PgStore`](crate::db::PgStore) is the production backend and
//! [`MemoryStore`] serves tests and single-node development.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ActiveSession, FocusSession, NewSession, SessionParticipant};

#[async_trait]
pub trait FocusStore: Send + Sync {
    /// Append a heartbeat and set the user's `last_seen_at`, atomically.
    async fn record_heartbeat(&self, user_id: Uuid, at: DateTime<Utc>) -> AppResult<()>;

    /// Latest liveness for each requested user; unknown users map to `None`.
    async fn last_seen(
        &self,
        user_ids: &[Uuid],
    ) -> AppResult<Vec<(Uuid, Option<DateTime<Utc>>)>>;

    /// An active session whose participant set is exactly `pair`.
    async fn find_active_pair_session(&self, pair: [Uuid; 2]) -> AppResult<Option<Uuid>>;

    /// Insert a session and one participant row per user in one transaction.
    /// Violating the unique active-pair or client-ref constraint yields
    /// [`AppError::Conflict`](crate::error::AppError::Conflict).
    async fn create_session(&self, new: NewSession) -> AppResult<FocusSession>;

    async fn find_by_client_ref(&self, client_ref: Uuid) -> AppResult<Option<FocusSession>>;

    async fn get_session(&self, id: Uuid) -> AppResult<Option<FocusSession>>;

    async fn participants(&self, session_id: Uuid) -> AppResult<Vec<SessionParticipant>>;

    /// Update one participant's pause flag. Returns false if no such row exists.
    async fn set_participant_pause(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        is_paused: bool,
    ) -> AppResult<bool>;

    /// `active -> completed`. Returns false if the session was not active.
    async fn end_session(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        minutes: i32,
    ) -> AppResult<bool>;

    /// Sessions the user participates in that are active, or completed with an
    /// end time at or after `ended_since`. Newest first.
    async fn sessions_for_user(
        &self,
        user_id: Uuid,
        ended_since: DateTime<Utc>,
    ) -> AppResult<Vec<ActiveSession>>;
}

/// Read-only view of the friend graph.
#[async_trait]
pub trait FriendGraph: Send + Sync {
    async fn friends_of(&self, user_id: Uuid) -> AppResult<Vec<Uuid>>;
}
