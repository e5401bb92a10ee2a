//! Per-device focus state machine.
//!
//! Merges three inputs into one [`FocusStatus`]: the local orientation signal
//! (device picked up or put down), the other participants' pause flags as last
//! reported by the server, and a one-second tick. The server's view never flips
//! the status directly; it only updates `paused_by_others`, which feeds the
//! same rule as the local signal.
//!
//! All methods are synchronous and take `now` explicitly; timers and network
//! calls live in [`FocusClient`](super::controller::FocusClient).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::{ClientError, ClientResult};
use crate::models::{
    ActiveSession, AggregateStatus, CreateSessionRequest, EndSessionRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FocusStatus {
    Active,
    Paused,
}

/// How a session left the Tracking phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The server holds the finalized session. `attempts` counts submissions.
    Recorded {
        session_id: Option<Uuid>,
        minutes: i32,
        attempts: u32,
    },
    /// A peer ended the session first.
    EndedRemotely { session_id: Uuid },
    /// Both the primary submission and the backup retry failed.
    Failed { minutes: i32, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Tracking,
    Ending,
    Finished(FinalizeOutcome),
}

/// The session being tracked. `id` is `None` for a manual start that has not
/// been created server-side yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSession {
    pub id: Option<Uuid>,
    pub user_ids: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeTarget {
    /// `POST /sessions/{id}/end`.
    End { session_id: Uuid },
    /// `POST /sessions` with the accumulated timer values.
    Create {
        user_ids: Vec<Uuid>,
        start_time: DateTime<Utc>,
        client_ref: Uuid,
    },
}

/// Built once when ending; every submission (primary, backup, manual retry)
/// sends exactly these values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeRequest {
    pub target: FinalizeTarget,
    pub end_time: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub minutes: i32,
}

impl FinalizeRequest {
    pub fn end_body(&self) -> EndSessionRequest {
        EndSessionRequest {
            end_time: self.end_time,
            minutes: self.minutes,
        }
    }

    pub fn create_body(&self) -> Option<CreateSessionRequest> {
        match &self.target {
            FinalizeTarget::Create {
                user_ids,
                start_time,
                client_ref,
            } => Some(CreateSessionRequest {
                user_ids: user_ids.clone(),
                start_time: *start_time,
                end_time: self.end_time,
                duration_seconds: i64::try_from(self.elapsed_seconds).unwrap_or(i64::MAX),
                client_ref: Some(*client_ref),
                finalize: true,
            }),
            FinalizeTarget::End { .. } => None,
        }
    }
}

/// Result of feeding a server snapshot into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Unchanged,
    /// Idle picked up an active session.
    Entered(Uuid),
    /// The tracked session's peer flags were refreshed.
    Updated,
    EndedRemotely(Uuid),
}

#[derive(Debug, Clone)]
pub struct FocusTracker {
    me: Uuid,
    phase: Phase,
    status: FocusStatus,
    elapsed_seconds: u64,
    total_paused_seconds: u64,
    pause_started_at: Option<DateTime<Utc>>,
    session: Option<TrackedSession>,
    picked_up: bool,
    paused_by_others: bool,
    /// Set when the user ends a session; blocks auto-entry for the rest of the
    /// app lifetime unless the user starts one manually.
    manually_exited: bool,
    pending: Option<FinalizeRequest>,
}

fn whole_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from(to.signed_duration_since(from).num_seconds()).unwrap_or(0)
}

impl FocusTracker {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            phase: Phase::Idle,
            status: FocusStatus::Active,
            elapsed_seconds: 0,
            total_paused_seconds: 0,
            pause_started_at: None,
            session: None,
            picked_up: false,
            paused_by_others: false,
            manually_exited: false,
            pending: None,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.me
    }
    pub fn phase(&self) -> &Phase {
        &self.phase
    }
    pub fn status(&self) -> FocusStatus {
        self.status
    }
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }
    pub fn total_paused_seconds(&self) -> u64 {
        self.total_paused_seconds
    }
    pub fn session(&self) -> Option<&TrackedSession> {
        self.session.as_ref()
    }
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().and_then(|s| s.id)
    }
    pub fn picked_up(&self) -> bool {
        self.picked_up
    }
    pub fn is_session_paused_by_others(&self) -> bool {
        self.paused_by_others
    }
    pub fn manually_exited(&self) -> bool {
        self.manually_exited
    }
    pub fn pending_finalize(&self) -> Option<&FinalizeRequest> {
        self.pending.as_ref()
    }
    pub fn is_tracking(&self) -> bool {
        self.phase == Phase::Tracking
    }

    /// True once the server holds a completed record of the session.
    pub fn is_finalized(&self) -> bool {
        matches!(
            self.phase,
            Phase::Finished(FinalizeOutcome::Recorded { .. })
                | Phase::Finished(FinalizeOutcome::EndedRemotely { .. })
        )
    }

    /// Merge a server snapshot (poll or push).
    pub fn observe_sessions(&mut self, sessions: &[ActiveSession], now: DateTime<Utc>) -> Reconciled {
        match self.phase {
            Phase::Idle => {
                if self.manually_exited {
                    return Reconciled::Unchanged;
                }
                let Some(found) = sessions
                    .iter()
                    .find(|s| s.status.is_active() && s.has_participant(self.me))
                else {
                    return Reconciled::Unchanged;
                };
                let tracked = TrackedSession {
                    id: Some(found.id),
                    user_ids: found.participants.iter().map(|p| p.user_id).collect(),
                    started_at: found.start_time,
                };
                // No local pause history exists for a session joined mid-way.
                self.enter_tracking(tracked, whole_seconds(found.start_time, now));
                self.paused_by_others = found.paused_by_others(self.me);
                self.recompute(now);
                Reconciled::Entered(found.id)
            }
            Phase::Tracking => {
                let Some(id) = self.session_id() else {
                    return Reconciled::Unchanged;
                };
                match sessions.iter().find(|s| s.id == id) {
                    Some(found) if found.status.is_active() => {
                        self.paused_by_others = found.paused_by_others(self.me);
                        self.recompute(now);
                        Reconciled::Updated
                    }
                    Some(_) => {
                        self.close_pause(now);
                        self.phase = Phase::Finished(FinalizeOutcome::EndedRemotely { session_id: id });
                        Reconciled::EndedRemotely(id)
                    }
                    None => Reconciled::Unchanged,
                }
            }
            Phase::Ending | Phase::Finished(_) => Reconciled::Unchanged,
        }
    }

    /// Local orientation signal. Returns true if the pause intent changed.
    pub fn set_picked_up(&mut self, picked_up: bool, now: DateTime<Utc>) -> bool {
        if self.picked_up == picked_up {
            return false;
        }
        self.picked_up = picked_up;
        self.recompute(now);
        true
    }

    /// Merge the aggregate returned by a pause sync.
    pub fn apply_aggregate(&mut self, aggregate: &AggregateStatus, now: DateTime<Utc>) {
        if self.phase != Phase::Tracking || self.session_id() != Some(aggregate.session_id) {
            return;
        }
        self.paused_by_others = aggregate.paused_by_others(self.me);
        self.recompute(now);
    }

    /// One second of wall time. Only counts while focusing.
    pub fn tick(&mut self) {
        if self.phase == Phase::Tracking && self.status == FocusStatus::Active {
            self.elapsed_seconds += 1;
        }
    }

    /// User-initiated start with `peers`; created server-side when it ends.
    pub fn start_manual(&mut self, peers: &[Uuid], now: DateTime<Utc>) -> ClientResult<()> {
        if matches!(self.phase, Phase::Tracking | Phase::Ending) {
            return Err(ClientError::InvalidState("start a session"));
        }
        let mut user_ids = vec![self.me];
        for peer in peers {
            if !user_ids.contains(peer) {
                user_ids.push(*peer);
            }
        }
        self.manually_exited = false;
        self.enter_tracking(
            TrackedSession {
                id: None,
                user_ids,
                started_at: now,
            },
            0,
        );
        self.paused_by_others = false;
        self.recompute(now);
        Ok(())
    }

    /// Leave Tracking and freeze the values every finalization attempt will send.
    pub fn begin_end(&mut self, now: DateTime<Utc>) -> ClientResult<FinalizeRequest> {
        if self.phase != Phase::Tracking {
            return Err(ClientError::InvalidState("end a session"));
        }
        let session = self
            .session
            .clone()
            .ok_or(ClientError::InvalidState("end a session"))?;
        self.close_pause(now);
        self.manually_exited = true;
        self.phase = Phase::Ending;

        let target = match session.id {
            Some(session_id) => FinalizeTarget::End { session_id },
            None => FinalizeTarget::Create {
                user_ids: session.user_ids,
                start_time: session.started_at,
                client_ref: Uuid::new_v4(),
            },
        };
        let request = FinalizeRequest {
            target,
            end_time: now,
            elapsed_seconds: self.elapsed_seconds,
            minutes: i32::try_from(self.elapsed_seconds / 60).unwrap_or(i32::MAX),
        };
        self.pending = Some(request.clone());
        Ok(request)
    }

    /// `stored_minutes` is what the server holds, when known; it wins over the
    /// locally computed value, which a peer's earlier end may have superseded.
    pub fn finalize_recorded(
        &mut self,
        session_id: Option<Uuid>,
        stored_minutes: Option<i32>,
        attempts: u32,
    ) {
        let minutes = stored_minutes
            .or_else(|| self.pending.as_ref().map(|p| p.minutes))
            .unwrap_or(0);
        if let Some(id) = session_id {
            if let Some(session) = self.session.as_mut() {
                session.id = Some(id);
            }
        }
        self.pending = None;
        self.phase = Phase::Finished(FinalizeOutcome::Recorded {
            session_id,
            minutes,
            attempts,
        });
    }

    /// Keeps the pending request so the user can retry.
    pub fn finalize_failed(&mut self, error: String) {
        let minutes = self.pending.as_ref().map(|p| p.minutes).unwrap_or(0);
        self.phase = Phase::Finished(FinalizeOutcome::Failed { minutes, error });
    }

    /// Retry from the Failed summary: back to Ending with the same request.
    pub fn resume_finalize(&mut self) -> ClientResult<FinalizeRequest> {
        match (&self.phase, &self.pending) {
            (Phase::Finished(FinalizeOutcome::Failed { .. }), Some(pending)) => {
                let pending = pending.clone();
                self.phase = Phase::Ending;
                Ok(pending)
            }
            _ => Err(ClientError::InvalidState("retry finalization")),
        }
    }

    /// Back to Idle after the summary. `manually_exited` survives.
    pub fn return_home(&mut self) {
        self.phase = Phase::Idle;
        self.status = FocusStatus::Active;
        self.elapsed_seconds = 0;
        self.total_paused_seconds = 0;
        self.pause_started_at = None;
        self.session = None;
        self.paused_by_others = false;
        self.pending = None;
    }

    fn enter_tracking(&mut self, session: TrackedSession, elapsed_seconds: u64) {
        self.phase = Phase::Tracking;
        self.session = Some(session);
        self.status = FocusStatus::Active;
        self.elapsed_seconds = elapsed_seconds;
        self.total_paused_seconds = 0;
        self.pause_started_at = None;
        self.pending = None;
    }

    fn close_pause(&mut self, now: DateTime<Utc>) {
        if let Some(started) = self.pause_started_at.take() {
            self.total_paused_seconds += whole_seconds(started, now);
        }
    }

    fn recompute(&mut self, now: DateTime<Utc>) {
        if self.phase != Phase::Tracking {
            return;
        }
        let next = if self.picked_up || self.paused_by_others {
            FocusStatus::Paused
        } else {
            FocusStatus::Active
        };
        match (self.status, next) {
            (FocusStatus::Paused, FocusStatus::Active) => self.close_pause(now),
            (FocusStatus::Active, FocusStatus::Paused) => self.pause_started_at = Some(now),
            _ => {}
        }
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParticipantStatus, SessionStatus};
    use chrono::Duration;

    fn session(id: Uuid, users: &[(Uuid, bool)], start: DateTime<Utc>) -> ActiveSession {
        let participants: Vec<ParticipantStatus> = users
            .iter()
            .map(|(user_id, is_paused)| ParticipantStatus {
                user_id: *user_id,
                is_paused: *is_paused,
            })
            .collect();
        ActiveSession {
            id,
            status: SessionStatus::Active,
            start_time: start,
            end_time: start + Duration::hours(1),
            minutes: 0,
            is_paused: participants.iter().any(|p| p.is_paused),
            participants,
        }
    }

    fn ticks(tracker: &mut FocusTracker, n: u64) {
        for _ in 0..n {
            tracker.tick();
        }
    }

    #[test]
    fn elapsed_excludes_paused_time() {
        let me = Uuid::new_v4();
        let t0 = Utc::now();
        let mut tracker = FocusTracker::new(me);
        tracker.start_manual(&[Uuid::new_v4()], t0).unwrap();

        ticks(&mut tracker, 30);
        assert!(tracker.set_picked_up(true, t0 + Duration::seconds(30)));
        assert_eq!(tracker.status(), FocusStatus::Paused);
        ticks(&mut tracker, 10);
        assert!(tracker.set_picked_up(false, t0 + Duration::seconds(40)));
        assert_eq!(tracker.status(), FocusStatus::Active);
        ticks(&mut tracker, 20);

        assert_eq!(tracker.elapsed_seconds(), 50);
        assert_eq!(tracker.total_paused_seconds(), 10);
    }

    #[test]
    fn auto_entry_uses_server_start_time() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut tracker = FocusTracker::new(me);

        let snapshot = [session(id, &[(me, false), (peer, false)], now - Duration::seconds(95))];
        assert_eq!(tracker.observe_sessions(&snapshot, now), Reconciled::Entered(id));
        assert_eq!(tracker.elapsed_seconds(), 95);
        assert_eq!(tracker.total_paused_seconds(), 0);
        assert_eq!(tracker.session_id(), Some(id));
        assert_eq!(tracker.status(), FocusStatus::Active);
    }

    #[test]
    fn sessions_of_other_users_are_ignored() {
        let me = Uuid::new_v4();
        let now = Utc::now();
        let mut tracker = FocusTracker::new(me);
        let foreign = [session(
            Uuid::new_v4(),
            &[(Uuid::new_v4(), false), (Uuid::new_v4(), false)],
            now,
        )];
        assert_eq!(tracker.observe_sessions(&foreign, now), Reconciled::Unchanged);
        assert_eq!(tracker.phase(), &Phase::Idle);
    }

    #[test]
    fn peer_pause_pauses_without_own_flag() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let id = Uuid::new_v4();
        let t0 = Utc::now();
        let mut tracker = FocusTracker::new(me);
        tracker.observe_sessions(&[session(id, &[(me, false), (peer, false)], t0)], t0);

        let t1 = t0 + Duration::seconds(5);
        tracker.observe_sessions(&[session(id, &[(me, false), (peer, true)], t0)], t1);
        assert!(tracker.is_session_paused_by_others());
        assert_eq!(tracker.status(), FocusStatus::Paused);

        // My own reported flag does not count as "others".
        let t2 = t1 + Duration::seconds(10);
        tracker.observe_sessions(&[session(id, &[(me, true), (peer, false)], t0)], t2);
        assert!(!tracker.is_session_paused_by_others());
        assert_eq!(tracker.status(), FocusStatus::Active);
        assert_eq!(tracker.total_paused_seconds(), 10);
    }

    #[test]
    fn aggregate_merge_only_feeds_the_rule() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let id = Uuid::new_v4();
        let t0 = Utc::now();
        let mut tracker = FocusTracker::new(me);
        tracker.observe_sessions(&[session(id, &[(me, false), (peer, false)], t0)], t0);
        tracker.set_picked_up(true, t0);

        // Server confirms only my pause: still paused, by me.
        let aggregate = AggregateStatus {
            session_id: id,
            status: SessionStatus::Active,
            is_paused: true,
            participants: vec![
                ParticipantStatus { user_id: me, is_paused: true },
                ParticipantStatus { user_id: peer, is_paused: false },
            ],
        };
        tracker.apply_aggregate(&aggregate, t0);
        assert!(!tracker.is_session_paused_by_others());
        assert_eq!(tracker.status(), FocusStatus::Paused);

        // A stale aggregate for another session is ignored.
        let mut stale = aggregate.clone();
        stale.session_id = Uuid::new_v4();
        stale.participants[1].is_paused = true;
        tracker.apply_aggregate(&stale, t0);
        assert!(!tracker.is_session_paused_by_others());
    }

    #[test]
    fn manual_exit_suppresses_auto_entry() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let t0 = Utc::now();
        let mut tracker = FocusTracker::new(me);
        let first = Uuid::new_v4();
        tracker.observe_sessions(&[session(first, &[(me, false), (peer, false)], t0)], t0);
        ticks(&mut tracker, 125);

        let request = tracker.begin_end(t0 + Duration::seconds(125)).unwrap();
        assert_eq!(request.minutes, 2);
        assert_eq!(request.target, FinalizeTarget::End { session_id: first });
        tracker.finalize_recorded(Some(first), None, 1);
        tracker.return_home();

        let second = Uuid::new_v4();
        let later = t0 + Duration::seconds(130);
        let snapshot = [session(second, &[(me, false), (peer, false)], later)];
        assert_eq!(tracker.observe_sessions(&snapshot, later), Reconciled::Unchanged);
        assert_eq!(tracker.phase(), &Phase::Idle);

        // A manual start clears the suppression.
        tracker.start_manual(&[peer], later).unwrap();
        assert!(!tracker.manually_exited());
    }

    #[test]
    fn remote_end_finishes_tracking() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let id = Uuid::new_v4();
        let t0 = Utc::now();
        let mut tracker = FocusTracker::new(me);
        tracker.observe_sessions(&[session(id, &[(me, false), (peer, false)], t0)], t0);

        let mut ended = session(id, &[(me, false), (peer, false)], t0);
        ended.status = SessionStatus::Completed;
        assert_eq!(
            tracker.observe_sessions(&[ended], t0 + Duration::seconds(60)),
            Reconciled::EndedRemotely(id)
        );
        assert!(tracker.is_finalized());
        assert!(!tracker.manually_exited());
        tracker.tick();
        assert_eq!(tracker.elapsed_seconds(), 0);
    }

    #[test]
    fn manual_session_finalizes_through_create() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let t0 = Utc::now();
        let mut tracker = FocusTracker::new(me);
        tracker.start_manual(&[peer, me, peer], t0).unwrap();
        ticks(&mut tracker, 61);

        let request = tracker.begin_end(t0 + Duration::seconds(61)).unwrap();
        let body = request.create_body().unwrap();
        assert_eq!(body.user_ids, vec![me, peer]);
        assert_eq!(body.duration_seconds, 61);
        assert_eq!(body.start_time, t0);
        assert!(body.client_ref.is_some());
        assert!(body.finalize);
        assert_eq!(request.minutes, 1);

        tracker.finalize_failed("offline".to_string());
        assert!(!tracker.is_finalized());
        let again = tracker.resume_finalize().unwrap();
        assert_eq!(again, request, "retries reuse the frozen request");
    }

    #[test]
    fn stored_minutes_override_local_count() {
        let me = Uuid::new_v4();
        let t0 = Utc::now();
        let mut tracker = FocusTracker::new(me);
        tracker.start_manual(&[], t0).unwrap();
        ticks(&mut tracker, 180);
        tracker.begin_end(t0 + Duration::seconds(180)).unwrap();

        tracker.finalize_recorded(Some(Uuid::new_v4()), Some(42), 2);
        assert!(matches!(
            tracker.phase(),
            Phase::Finished(FinalizeOutcome::Recorded { minutes: 42, attempts: 2, .. })
        ));
    }

    #[test]
    fn ending_closes_an_open_pause() {
        let me = Uuid::new_v4();
        let t0 = Utc::now();
        let mut tracker = FocusTracker::new(me);
        tracker.start_manual(&[], t0).unwrap();
        ticks(&mut tracker, 5);
        tracker.set_picked_up(true, t0 + Duration::seconds(5));
        tracker.begin_end(t0 + Duration::seconds(12)).unwrap();
        assert_eq!(tracker.total_paused_seconds(), 7);
        assert!(tracker.begin_end(t0).is_err());
    }
}
