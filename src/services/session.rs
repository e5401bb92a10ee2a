//! Session lifecycle: manual creation and the single `active -> completed` transition.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{
    ActiveSession, CreateSessionRequest, EndSessionRequest, FocusSession, NewSession,
    SessionStatus,
};
use crate::repositories::FocusStore;

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn FocusStore>,
}

impl SessionService {
    pub fn new(store: Arc<dyn FocusStore>) -> Self {
        Self { store }
    }

    /// Manual creation. With `finalize` set the session is recorded as already
    /// completed with `duration_seconds / 60` minutes, otherwise it starts
    /// active. A repeated `client_ref` returns the session created the first time.
    #[instrument(skip(self, body), fields(client_ref = ?body.client_ref))]
    pub async fn create(
        &self,
        caller: Uuid,
        body: CreateSessionRequest,
    ) -> AppResult<ActiveSession> {
        body.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        if body.end_time < body.start_time {
            return Err(AppError::Validation(
                "endTime must not precede startTime".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let user_ids: Vec<Uuid> = body
            .user_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if !user_ids.contains(&caller) {
            return Err(AppError::Forbidden(
                "caller must be one of userIds".to_string(),
            ));
        }

        if let Some(client_ref) = body.client_ref {
            if let Some(existing) = self.store.find_by_client_ref(client_ref).await? {
                return self.view_for(existing, caller).await;
            }
        }

        let (status, minutes) = if body.finalize {
            (SessionStatus::Completed, minutes_from_seconds(body.duration_seconds))
        } else {
            (SessionStatus::Active, 0)
        };

        let created = self
            .store
            .create_session(NewSession {
                user_ids,
                status,
                start_time: body.start_time,
                end_time: body.end_time,
                minutes,
                pair: None,
                client_ref: body.client_ref,
            })
            .await;

        let session = match (created, body.client_ref) {
            (Ok(session), _) => session,
            (Err(AppError::Conflict(_)), Some(client_ref)) => self
                .store
                .find_by_client_ref(client_ref)
                .await?
                .ok_or_else(|| AppError::Conflict("clientRef already used".to_string()))?,
            (Err(e), _) => return Err(e),
        };
        info!(session_id = %session.id, status = session.status.as_str(), minutes = session.minutes, "focus session created");
        self.view_for(session, caller).await
    }

    /// Finalize a session for all participants.
    #[instrument(skip(self))]
    pub async fn end(
        &self,
        caller: Uuid,
        session_id: Uuid,
        body: EndSessionRequest,
    ) -> AppResult<ActiveSession> {
        body.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;
        let participants = self.store.participants(session_id).await?;
        if !participants.iter().any(|p| p.user_id == caller) {
            return Err(AppError::Forbidden(format!(
                "not a participant of session {}",
                session_id
            )));
        }
        if !session.status.is_active() {
            return Err(AppError::AlreadyEnded(session_id));
        }

        if !self
            .store
            .end_session(session_id, body.end_time, body.minutes)
            .await?
        {
            return Err(AppError::AlreadyEnded(session_id));
        }
        info!(session_id = %session_id, user_id = %caller, minutes = body.minutes, "focus session ended");

        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;
        Ok(ActiveSession::from_parts(session, &participants))
    }

    async fn view_for(&self, session: FocusSession, caller: Uuid) -> AppResult<ActiveSession> {
        let participants = self.store.participants(session.id).await?;
        if !participants.iter().any(|p| p.user_id == caller) {
            return Err(AppError::Forbidden(
                "clientRef belongs to another session".to_string(),
            ));
        }
        Ok(ActiveSession::from_parts(session, &participants))
    }
}

/// Whole minutes in `seconds`, saturating at `i32::MAX`.
pub fn minutes_from_seconds(seconds: i64) -> i32 {
    i32::try_from(seconds.max(0) / 60).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemoryStore;
    use chrono::{Duration, Utc};

    fn service() -> (Arc<MemoryStore>, SessionService) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), SessionService::new(store))
    }

    fn finished_request(users: Vec<Uuid>, seconds: i64) -> CreateSessionRequest {
        let end = Utc::now();
        CreateSessionRequest {
            user_ids: users,
            start_time: end - Duration::seconds(seconds),
            end_time: end,
            duration_seconds: seconds,
            client_ref: Some(Uuid::new_v4()),
            finalize: true,
        }
    }

    #[test]
    fn minutes_round_down() {
        assert_eq!(minutes_from_seconds(59), 0);
        assert_eq!(minutes_from_seconds(60), 1);
        assert_eq!(minutes_from_seconds(2519), 41);
        assert_eq!(minutes_from_seconds(-5), 0);
    }

    #[tokio::test]
    async fn create_and_finalize_records_completed_session() {
        let (_, sessions) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let created = sessions
            .create(a, finished_request(vec![a, b, a], 25 * 60 + 30))
            .await
            .unwrap();
        assert_eq!(created.status, SessionStatus::Completed);
        assert_eq!(created.minutes, 25);
        assert_eq!(created.participants.len(), 2);
    }

    #[tokio::test]
    async fn repeated_client_ref_returns_original() {
        let (store, sessions) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let body = finished_request(vec![a, b], 600);
        let first = sessions.create(a, body.clone()).await.unwrap();
        let second = sessions.create(a, body).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.all_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn unfinalized_create_starts_active_session() {
        let (_, sessions) = service();
        let a = Uuid::new_v4();
        let now = Utc::now();
        let created = sessions
            .create(
                a,
                CreateSessionRequest {
                    user_ids: vec![a],
                    start_time: now,
                    end_time: now + Duration::minutes(30),
                    duration_seconds: 0,
                    client_ref: None,
                    finalize: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(created.status, SessionStatus::Active);
        assert_eq!(created.minutes, 0);
    }

    #[tokio::test]
    async fn finalize_does_not_depend_on_server_clock() {
        let (store, sessions) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        // Device clock a few seconds ahead of the server.
        let mut body = finished_request(vec![a, b], 1500);
        body.start_time += Duration::seconds(5);
        body.end_time += Duration::seconds(5);

        let created = sessions.create(a, body).await.unwrap();
        assert_eq!(created.status, SessionStatus::Completed);
        assert_eq!(created.minutes, 25);
        let recent = Utc::now() - Duration::seconds(60);
        let seen_by_peer = store.sessions_for_user(b, recent).await.unwrap();
        assert!(seen_by_peer.iter().all(|s| !s.status.is_active()));
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let (_, sessions) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let err = sessions.create(a, finished_request(vec![b], 60)).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = sessions.create(a, finished_request(vec![], 60)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut backwards = finished_request(vec![a], 60);
        backwards.end_time = backwards.start_time - Duration::seconds(1);
        let err = sessions.create(a, backwards).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn end_finalizes_once() {
        let (_, sessions) = service();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let active = sessions
            .create(
                a,
                CreateSessionRequest {
                    user_ids: vec![a, b],
                    start_time: now,
                    end_time: now + Duration::hours(1),
                    duration_seconds: 0,
                    client_ref: None,
                    finalize: false,
                },
            )
            .await
            .unwrap();

        let body = EndSessionRequest {
            end_time: Utc::now(),
            minutes: 42,
        };
        let err = sessions.end(c, active.id, body).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let ended = sessions.end(a, active.id, body).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert_eq!(ended.minutes, 42);

        let err = sessions.end(b, active.id, body).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyEnded(_)));

        let err = sessions.end(a, Uuid::new_v4(), body).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
