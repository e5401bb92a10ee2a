//! In-process store with the same semantics as the PostgreSQL backend,
//! including the unique active-pair and client-ref constraints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ActiveSession, FocusSession, NewSession, SessionParticipant, SessionStatus,
};

use super::{FocusStore, FriendGraph};

struct StoredSession {
    session: FocusSession,
    pair: Option<[Uuid; 2]>,
    client_ref: Option<Uuid>,
    participants: Vec<SessionParticipant>,
}

#[derive(Default)]
struct Inner {
    last_seen: HashMap<Uuid, DateTime<Utc>>,
    heartbeats: Vec<(Uuid, DateTime<Utc>)>,
    sessions: HashMap<Uuid, StoredSession>,
    friends: HashMap<Uuid, HashSet<Uuid>>,
}

/// [`FocusStore`] and [`FriendGraph`] backed by a single `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mutual friendship. Friend-request workflows live elsewhere; this
    /// seeds the graph for development and tests.
    pub async fn add_friendship(&self, a: Uuid, b: Uuid) {
        let mut inner = self.inner.write().await;
        inner.friends.entry(a).or_default().insert(b);
        inner.friends.entry(b).or_default().insert(a);
    }

    pub async fn heartbeat_count(&self, user_id: Uuid) -> usize {
        let inner = self.inner.read().await;
        inner.heartbeats.iter().filter(|(u, _)| *u == user_id).count()
    }

    /// All sessions, any status, in creation order.
    pub async fn all_sessions(&self) -> Vec<ActiveSession> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<ActiveSession> = inner
            .sessions
            .values()
            .map(|s| ActiveSession::from_parts(s.session.clone(), &s.participants))
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        sessions
    }
}

fn participant_set(participants: &[SessionParticipant]) -> HashSet<Uuid> {
    participants.iter().map(|p| p.user_id).collect()
}

#[async_trait]
impl FocusStore for MemoryStore {
    async fn record_heartbeat(&self, user_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.heartbeats.push((user_id, at));
        inner.last_seen.insert(user_id, at);
        Ok(())
    }

    async fn last_seen(
        &self,
        user_ids: &[Uuid],
    ) -> AppResult<Vec<(Uuid, Option<DateTime<Utc>>)>> {
        let inner = self.inner.read().await;
        Ok(user_ids
            .iter()
            .map(|id| (*id, inner.last_seen.get(id).copied()))
            .collect())
    }

    async fn find_active_pair_session(&self, pair: [Uuid; 2]) -> AppResult<Option<Uuid>> {
        let wanted: HashSet<Uuid> = pair.into_iter().collect();
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .find(|s| {
                s.session.status.is_active() && participant_set(&s.participants) == wanted
            })
            .map(|s| s.session.id))
    }

    async fn create_session(&self, new: NewSession) -> AppResult<FocusSession> {
        let mut inner = self.inner.write().await;

        if let Some(pair) = new.pair {
            let taken = inner
                .sessions
                .values()
                .any(|s| s.pair == Some(pair) && s.session.status.is_active());
            if taken {
                return Err(AppError::Conflict(
                    "an active session already exists for this pair".to_string(),
                ));
            }
        }
        if let Some(client_ref) = new.client_ref {
            if inner
                .sessions
                .values()
                .any(|s| s.client_ref == Some(client_ref))
            {
                return Err(AppError::Conflict("clientRef already used".to_string()));
            }
        }

        let id = Uuid::new_v4();
        let session = FocusSession {
            id,
            status: new.status,
            start_time: new.start_time,
            end_time: new.end_time,
            minutes: new.minutes,
            created_at: Utc::now(),
        };
        let participants = new
            .user_ids
            .iter()
            .map(|user_id| SessionParticipant {
                session_id: id,
                user_id: *user_id,
                is_paused: false,
            })
            .collect();
        inner.sessions.insert(
            id,
            StoredSession {
                session: session.clone(),
                pair: new.pair,
                client_ref: new.client_ref,
                participants,
            },
        );
        Ok(session)
    }

    async fn find_by_client_ref(&self, client_ref: Uuid) -> AppResult<Option<FocusSession>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .find(|s| s.client_ref == Some(client_ref))
            .map(|s| s.session.clone()))
    }

    async fn get_session(&self, id: Uuid) -> AppResult<Option<FocusSession>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(&id).map(|s| s.session.clone()))
    }

    async fn participants(&self, session_id: Uuid) -> AppResult<Vec<SessionParticipant>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .get(&session_id)
            .map(|s| s.participants.clone())
            .unwrap_or_default())
    }

    async fn set_participant_pause(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        is_paused: bool,
    ) -> AppResult<bool> {
        let mut inner = self.inner.write().await;
        let row = inner
            .sessions
            .get_mut(&session_id)
            .and_then(|s| s.participants.iter_mut().find(|p| p.user_id == user_id));
        match row {
            Some(row) => {
                row.is_paused = is_paused;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn end_session(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        minutes: i32,
    ) -> AppResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(stored) if stored.session.status.is_active() => {
                stored.session.status = SessionStatus::Completed;
                stored.session.end_time = end_time;
                stored.session.minutes = minutes;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sessions_for_user(
        &self,
        user_id: Uuid,
        ended_since: DateTime<Utc>,
    ) -> AppResult<Vec<ActiveSession>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<ActiveSession> = inner
            .sessions
            .values()
            .filter(|s| s.participants.iter().any(|p| p.user_id == user_id))
            .filter(|s| s.session.status.is_active() || s.session.end_time >= ended_since)
            .map(|s| ActiveSession::from_parts(s.session.clone(), &s.participants))
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }
}

#[async_trait]
impl FriendGraph for MemoryStore {
    async fn friends_of(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let inner = self.inner.read().await;
        let mut friends: Vec<Uuid> = inner
            .friends
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        friends.sort();
        Ok(friends)
    }
}
