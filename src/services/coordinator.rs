//! Auto-creation of shared sessions between mutually online friends.
//!
//! Both users of a pair run the coordinator on their own heartbeats. They agree
//! on who creates the pair's session without exchanging messages: the smaller
//! id of the sorted pair leads, the other side never creates. The storage layer
//! additionally refuses a second active session for the same pair, so a residual
//! race surfaces as [`AppError::Conflict`] and is counted, not duplicated.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::presence::PresenceService;
use crate::error::{AppError, AppResult};
use crate::models::{sorted_pair, NewSession, SessionStatus};
use crate::repositories::FocusStore;

/// Provisional length of an auto-created session until someone ends it.
pub const PROVISIONAL_SESSION_SECS: i64 = 60 * 60;

/// What one coordinator run did, per online friend.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoordinatorReport {
    pub created: Vec<Uuid>,
    pub skipped_existing: usize,
    pub skipped_follower: usize,
    pub conflicts: usize,
}

/// True if `user_id` is the pair member responsible for creating its session.
pub fn is_leader(user_id: Uuid, pair: [Uuid; 2]) -> bool {
    pair[0] == user_id
}

#[derive(Clone)]
pub struct SessionCoordinator {
    store: Arc<dyn FocusStore>,
    presence: PresenceService,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn FocusStore>, presence: PresenceService) -> Self {
        Self { store, presence }
    }

    /// Run in the background after a heartbeat. Errors are logged, never returned,
    /// so the heartbeat response does not depend on this run.
    pub fn spawn_for(&self, user_id: Uuid) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            match coordinator.run_for(user_id).await {
                Ok(report) if !report.created.is_empty() => {
                    debug!(user_id = %user_id, created = report.created.len(), "coordinator run finished");
                }
                Ok(_) => {}
                Err(e) => warn!(user_id = %user_id, error = %e, "session auto-creation failed"),
            }
        });
    }

    /// Create an active session with every online friend for which `user_id` leads
    /// and no active session exists yet.
    #[instrument(skip(self))]
    pub async fn run_for(&self, user_id: Uuid) -> AppResult<CoordinatorReport> {
        let mut report = CoordinatorReport::default();

        for friend_id in self.presence.online_friends(user_id).await? {
            if friend_id == user_id {
                continue;
            }
            let pair = sorted_pair(user_id, friend_id);

            if !is_leader(user_id, pair) {
                report.skipped_follower += 1;
                continue;
            }
            if self.store.find_active_pair_session(pair).await?.is_some() {
                report.skipped_existing += 1;
                continue;
            }

            let now = Utc::now();
            let new = NewSession {
                user_ids: pair.to_vec(),
                status: SessionStatus::Active,
                start_time: now,
                end_time: now + Duration::seconds(PROVISIONAL_SESSION_SECS),
                minutes: 0,
                pair: Some(pair),
                client_ref: None,
            };
            match self.store.create_session(new).await {
                Ok(session) => {
                    info!(session_id = %session.id, leader = %pair[0], peer = %pair[1], "auto-created focus session");
                    report.created.push(session.id);
                }
                Err(AppError::Conflict(_)) => {
                    debug!(leader = %pair[0], peer = %pair[1], "pair session created concurrently");
                    report.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}
