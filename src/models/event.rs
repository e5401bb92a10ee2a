//! Messages pushed over the session status stream.

use serde::{Deserialize, Serialize};

use super::session::ActiveSession;

/// SSE event name and message `type` tag of a status snapshot.
pub const SESSION_STATUS_EVENT: &str = "session_status";

/// Payload of one stream tick: the caller's current and recently ended sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    SessionStatus { sessions: Vec<ActiveSession> },
}

impl StreamMessage {
    pub fn into_sessions(self) -> Vec<ActiveSession> {
        match self {
            StreamMessage::SessionStatus { sessions } => sessions,
        }
    }
}
