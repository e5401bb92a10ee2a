//! Pause aggregation: one flag per participant, OR-reduced on every read.

use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{aggregate_paused, AggregateStatus, ParticipantStatus};
use crate::repositories::FocusStore;

#[derive(Clone)]
pub struct PauseAggregator {
    store: Arc<dyn FocusStore>,
}

impl PauseAggregator {
    pub fn new(store: Arc<dyn FocusStore>) -> Self {
        Self { store }
    }

    /// Set the caller's own pause flag and return the resulting aggregate.
    #[instrument(skip(self))]
    pub async fn set_participant_pause(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        is_paused: bool,
    ) -> AppResult<AggregateStatus> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;
        let participants = self.store.participants(session_id).await?;
        if !participants.iter().any(|p| p.user_id == user_id) {
            return Err(not_participant(session_id));
        }
        if !session.status.is_active() {
            return Err(AppError::SessionNotActive(session_id));
        }

        if !self
            .store
            .set_participant_pause(session_id, user_id, is_paused)
            .await?
        {
            return Err(not_participant(session_id));
        }
        debug!(session_id = %session_id, user_id = %user_id, is_paused, "participant pause updated");

        self.aggregate_status(session_id).await
    }

    /// Session status with `is_paused = OR(participants)`.
    pub async fn aggregate_status(&self, session_id: Uuid) -> AppResult<AggregateStatus> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;
        let participants: Vec<ParticipantStatus> = self
            .store
            .participants(session_id)
            .await?
            .iter()
            .map(ParticipantStatus::from)
            .collect();
        Ok(AggregateStatus {
            session_id,
            status: session.status,
            is_paused: aggregate_paused(&participants),
            participants,
        })
    }

    /// [`aggregate_status`](Self::aggregate_status) restricted to participants.
    pub async fn aggregate_status_for(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<AggregateStatus> {
        let status = self.aggregate_status(session_id).await?;
        if !status.participants.iter().any(|p| p.user_id == user_id) {
            return Err(not_participant(session_id));
        }
        Ok(status)
    }
}

fn not_participant(session_id: Uuid) -> AppError {
    AppError::Forbidden(format!("not a participant of session {}", session_id))
}
