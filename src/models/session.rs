//! Focus sessions, their participants, and the derived pause aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Lifecycle of a focus session. Only `Active -> Completed` is ever taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }

    /// Parse the stored column value. Unknown values are treated as completed so
    /// they never re-enter tracking.
    pub fn from_db(value: &str) -> Self {
        match value {
            "active" => SessionStatus::Active,
            _ => SessionStatus::Completed,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Active)
    }
}

/// One shared focus period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub id: Uuid,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    /// Provisional while active.
    pub end_time: DateTime<Utc>,
    /// Finalized duration; 0 while active.
    pub minutes: i32,
    pub created_at: DateTime<Utc>,
}

/// Join record between a session and one of its users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParticipant {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub is_paused: bool,
}

/// Per-user pause flag as exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStatus {
    pub user_id: Uuid,
    pub is_paused: bool,
}

impl From<&SessionParticipant> for ParticipantStatus {
    fn from(p: &SessionParticipant) -> Self {
        Self {
            user_id: p.user_id,
            is_paused: p.is_paused,
        }
    }
}

/// A session as seen by a participant: row data plus the derived pause aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub id: Uuid,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub minutes: i32,
    pub is_paused: bool,
    pub participants: Vec<ParticipantStatus>,
}

impl ActiveSession {
    pub fn from_parts(session: FocusSession, participants: &[SessionParticipant]) -> Self {
        let participants: Vec<ParticipantStatus> =
            participants.iter().map(ParticipantStatus::from).collect();
        Self {
            id: session.id,
            status: session.status,
            start_time: session.start_time,
            end_time: session.end_time,
            minutes: session.minutes,
            is_paused: aggregate_paused(&participants),
            participants,
        }
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    /// True if any participant other than `user_id` holds the session paused.
    pub fn paused_by_others(&self, user_id: Uuid) -> bool {
        paused_by_others(&self.participants, user_id)
    }
}

/// Aggregate pause status returned by the pause endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatus {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub is_paused: bool,
    pub participants: Vec<ParticipantStatus>,
}

impl AggregateStatus {
    pub fn paused_by_others(&self, user_id: Uuid) -> bool {
        paused_by_others(&self.participants, user_id)
    }
}

/// Session-wide pause status: paused if any participant is paused.
pub fn aggregate_paused(participants: &[ParticipantStatus]) -> bool {
    participants.iter().any(|p| p.is_paused)
}

fn paused_by_others(participants: &[ParticipantStatus], user_id: Uuid) -> bool {
    participants
        .iter()
        .any(|p| p.user_id != user_id && p.is_paused)
}

/// The unordered pair `{a, b}` in its canonical order. The first element is the
/// leader responsible for creating the pair's auto session.
pub fn sorted_pair(a: Uuid, b: Uuid) -> [Uuid; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

/// Everything needed to insert a session and its participant rows atomically.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_ids: Vec<Uuid>,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub minutes: i32,
    /// Set for auto-created sessions; backs the unique active-pair constraint.
    pub pair: Option<[Uuid; 2]>,
    /// Client idempotency key for the create-and-finalize path.
    pub client_ref: Option<Uuid>,
}

/// Body of `POST /sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 16))]
    pub user_ids: Vec<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[validate(range(min = 0))]
    pub duration_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<Uuid>,
    /// Record the session as completed with `duration_seconds` instead of
    /// starting it.
    #[serde(default)]
    pub finalize: bool,
}

/// Body of `POST /sessions/{id}/pause`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseRequest {
    pub is_paused: bool,
}

/// Body of `POST /sessions/{id}/end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    pub end_time: DateTime<Utc>,
    #[validate(range(min = 0))]
    pub minutes: i32,
}

/// Query of `GET /sessions/active`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionsQuery {
    pub user_id: Option<Uuid>,
}
