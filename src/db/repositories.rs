//! PostgreSQL store: users' liveness, heartbeats, friendships, focus sessions
//! and their participants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

use super::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{
    ActiveSession, FocusSession, NewSession, SessionParticipant, SessionStatus,
};
use crate::repositories::{FocusStore, FriendGraph};

// ---- Rows ----

#[derive(Debug, FromRow)]
pub struct FocusSessionRow {
    pub id: Uuid,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub minutes: i32,
    pub created_at: DateTime<Utc>,
}

impl From<FocusSessionRow> for FocusSession {
    fn from(row: FocusSessionRow) -> Self {
        FocusSession {
            id: row.id,
            status: SessionStatus::from_db(&row.status),
            start_time: row.start_time,
            end_time: row.end_time,
            minutes: row.minutes,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ParticipantRow {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub is_paused: bool,
}

impl From<ParticipantRow> for SessionParticipant {
    fn from(row: ParticipantRow) -> Self {
        SessionParticipant {
            session_id: row.session_id,
            user_id: row.user_id,
            is_paused: row.is_paused,
        }
    }
}

const SESSION_COLUMNS: &str = "id, status, start_time, end_time, minutes, created_at";

const CLIENT_REF_CONSTRAINT: &str = "focus_sessions_client_ref_key";

fn conflict_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some(CLIENT_REF_CONSTRAINT) => "clientRef already used",
        _ => "an active session already exists for this pair",
    }
}

fn conflict_or_db(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(conflict_message(db.constraint()).to_string())
        }
        _ => AppError::Db(e),
    }
}

/// [`FocusStore`] and [`FriendGraph`] over a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FocusStore for PgStore {
    async fn record_heartbeat(&self, user_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO heartbeats (user_id, created_at) VALUES ($1, $2)")
            .bind(user_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, last_seen_at)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn last_seen(
        &self,
        user_ids: &[Uuid],
    ) -> AppResult<Vec<(Uuid, Option<DateTime<Utc>>)>> {
        let rows = sqlx::query_as::<_, (Uuid, Option<DateTime<Utc>>)>(
            "SELECT id, last_seen_at FROM users WHERE id = ANY($1)",
        )
        .bind(user_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        let known: HashMap<Uuid, Option<DateTime<Utc>>> = rows.into_iter().collect();
        Ok(user_ids
            .iter()
            .map(|id| (*id, known.get(id).copied().flatten()))
            .collect())
    }

    async fn find_active_pair_session(&self, pair: [Uuid; 2]) -> AppResult<Option<Uuid>> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT s.id
            FROM focus_sessions s
            JOIN session_participants p ON p.session_id = s.id
            WHERE s.status = 'active'
            GROUP BY s.id
            HAVING COUNT(*) = 2 AND bool_and(p.user_id = ANY($1))
            LIMIT 1
            "#,
        )
        .bind(pair.to_vec())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    async fn create_session(&self, new: NewSession) -> AppResult<FocusSession> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, FocusSessionRow>(&format!(
            r#"
            INSERT INTO focus_sessions (status, start_time, end_time, minutes, pair_low, pair_high, client_ref)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(new.status.as_str())
        .bind(new.start_time)
        .bind(new.end_time)
        .bind(new.minutes)
        .bind(new.pair.map(|p| p[0]))
        .bind(new.pair.map(|p| p[1]))
        .bind(new.client_ref)
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict_or_db)?;

        for user_id in &new.user_ids {
            sqlx::query(
                "INSERT INTO session_participants (session_id, user_id, is_paused) VALUES ($1, $2, false)",
            )
            .bind(row.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(row.into())
    }

    async fn find_by_client_ref(&self, client_ref: Uuid) -> AppResult<Option<FocusSession>> {
        let row = sqlx::query_as::<_, FocusSessionRow>(&format!(
            "SELECT {} FROM focus_sessions WHERE client_ref = $1",
            SESSION_COLUMNS
        ))
        .bind(client_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_session(&self, id: Uuid) -> AppResult<Option<FocusSession>> {
        let row = sqlx::query_as::<_, FocusSessionRow>(&format!(
            "SELECT {} FROM focus_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn participants(&self, session_id: Uuid) -> AppResult<Vec<SessionParticipant>> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            "SELECT session_id, user_id, is_paused FROM session_participants WHERE session_id = $1 ORDER BY user_id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_participant_pause(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        is_paused: bool,
    ) -> AppResult<bool> {
        let r = sqlx::query(
            "UPDATE session_participants SET is_paused = $1 WHERE session_id = $2 AND user_id = $3",
        )
        .bind(is_paused)
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    async fn end_session(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        minutes: i32,
    ) -> AppResult<bool> {
        let r = sqlx::query(
            "UPDATE focus_sessions SET status = 'completed', end_time = $1, minutes = $2 WHERE id = $3 AND status = 'active'",
        )
        .bind(end_time)
        .bind(minutes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    async fn sessions_for_user(
        &self,
        user_id: Uuid,
        ended_since: DateTime<Utc>,
    ) -> AppResult<Vec<ActiveSession>> {
        let sessions = sqlx::query_as::<_, FocusSessionRow>(
            r#"
            SELECT s.id, s.status, s.start_time, s.end_time, s.minutes, s.created_at
            FROM focus_sessions s
            JOIN session_participants p ON p.session_id = s.id
            WHERE p.user_id = $1
              AND (s.status = 'active' OR (s.status = 'completed' AND s.end_time >= $2))
            ORDER BY s.start_time DESC
            "#,
        )
        .bind(user_id)
        .bind(ended_since)
        .fetch_all(&self.pool)
        .await?;
        if sessions.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();
        let rows = sqlx::query_as::<_, ParticipantRow>(
            "SELECT session_id, user_id, is_paused FROM session_participants WHERE session_id = ANY($1) ORDER BY user_id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        let mut by_session: HashMap<Uuid, Vec<SessionParticipant>> = HashMap::new();
        for row in rows {
            by_session.entry(row.session_id).or_default().push(row.into());
        }

        Ok(sessions
            .into_iter()
            .map(|row| {
                let participants = by_session.remove(&row.id).unwrap_or_default();
                ActiveSession::from_parts(row.into(), &participants)
            })
            .collect())
    }
}

#[async_trait]
impl FriendGraph for PgStore {
    async fn friends_of(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT friend_id FROM friendships WHERE user_id = $1 ORDER BY friend_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_the_violated_constraint() {
        assert_eq!(
            conflict_message(Some("focus_sessions_client_ref_key")),
            "clientRef already used"
        );
        assert_eq!(
            conflict_message(Some("focus_sessions_active_pair")),
            "an active session already exists for this pair"
        );
        assert_eq!(
            conflict_message(None),
            "an active session already exists for this pair"
        );
    }
}
