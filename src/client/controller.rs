//! Async driver for [`FocusTracker`]: timers, reconciliation and finalization.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::api::SessionApi;
use super::debounce::Debouncer;
use super::error::{ClientError, ClientResult};
use super::tracker::{FinalizeOutcome, FinalizeRequest, FinalizeTarget, FocusTracker, Phase, Reconciled};
use crate::models::ActiveSession;

/// Timing knobs for [`FocusClient`].
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub tick: Duration,
    pub pause_debounce: Duration,
    pub reconcile_interval: Duration,
    /// How long after the primary finalization the backup check runs.
    pub backup_delay: Duration,
    /// Upper bound on waiting for an in-flight finalization once the backup
    /// has been sent.
    pub finalize_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            pause_debounce: Duration::from_millis(300),
            reconcile_interval: Duration::from_secs(5),
            backup_delay: Duration::from_millis(100),
            finalize_timeout: Duration::from_secs(10),
        }
    }
}

struct Shared<A> {
    api: A,
    config: ClientConfig,
    tracker: Mutex<FocusTracker>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    pause_sync: Debouncer,
}

impl<A> Drop for Shared<A> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

/// Drives a [`FocusTracker`] for one signed-in device: runs the one-second
/// ticker while tracking, reconciles against server snapshots, debounces pause
/// updates, and finalizes a session exactly once.
///
/// Background tasks hold only a weak reference; dropping the client stops them.
pub struct FocusClient<A: SessionApi> {
    shared: Arc<Shared<A>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: SessionApi> FocusClient<A> {
    pub fn new(api: A, me: Uuid, config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                pause_sync: Debouncer::new(config.pause_debounce),
                config,
                tracker: Mutex::new(FocusTracker::new(me)),
                ticker: Mutex::new(None),
            }),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the tracker.
    pub async fn tracker(&self) -> FocusTracker {
        self.shared.tracker.lock().await.clone()
    }

    /// Poll `active_sessions` every `reconcile_interval`.
    pub async fn start_reconciling(&self) {
        let weak = Arc::downgrade(&self.shared);
        let period = self.shared.config.reconcile_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                match shared.reconcile_now().await {
                    Ok(_) => {}
                    Err(e) if e.is_transient() => debug!(error = %e, "reconcile poll failed"),
                    Err(e) => warn!(error = %e, "reconcile poll rejected"),
                }
            }
        });
        self.background.lock().await.push(handle);
    }

    /// Merge pushed snapshots as they arrive. Polling keeps working if the feed ends.
    pub async fn follow_feed<S>(&self, feed: S)
    where
        S: Stream<Item = Vec<ActiveSession>> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            let mut feed = Box::pin(feed);
            while let Some(sessions) = feed.next().await {
                let Some(shared) = weak.upgrade() else { break };
                shared.observe(&sessions).await;
            }
            debug!("session feed closed");
        });
        self.background.lock().await.push(handle);
    }

    pub async fn reconcile_now(&self) -> ClientResult<Reconciled> {
        self.shared.reconcile_now().await
    }

    pub async fn observe(&self, sessions: &[ActiveSession]) -> Reconciled {
        self.shared.observe(sessions).await
    }

    /// Device orientation changed. The server hears about it after the
    /// debounce delay, with whatever the intent is by then.
    pub async fn set_picked_up(&self, picked_up: bool) {
        let session_id = {
            let mut tracker = self.shared.tracker.lock().await;
            if !tracker.set_picked_up(picked_up, Utc::now()) || !tracker.is_tracking() {
                return;
            }
            tracker.session_id()
        };
        // A manual session has no server row to pause until it is finalized.
        if let Some(session_id) = session_id {
            self.shared.schedule_pause_sync(session_id).await;
        }
    }

    pub async fn start_manual(&self, peers: &[Uuid]) -> ClientResult<()> {
        self.shared
            .tracker
            .lock()
            .await
            .start_manual(peers, Utc::now())?;
        info!(peers = peers.len(), "manual focus session started");
        self.shared.start_ticker().await;
        Ok(())
    }

    /// End the tracked session and persist it.
    pub async fn end(&self) -> ClientResult<FinalizeOutcome> {
        let request = self.shared.tracker.lock().await.begin_end(Utc::now())?;
        self.shared.stop_ticker().await;
        self.shared.pause_sync.cancel().await;
        info!(minutes = request.minutes, "ending focus session");
        Ok(self.shared.finalize(request).await)
    }

    /// Resubmit the frozen request after a failed finalization.
    pub async fn retry_finalize(&self) -> ClientResult<FinalizeOutcome> {
        let request = self.shared.tracker.lock().await.resume_finalize()?;
        Ok(self.shared.finalize(request).await)
    }

    /// Leave the summary for Idle.
    pub async fn return_home(&self) -> ClientResult<()> {
        let mut tracker = self.shared.tracker.lock().await;
        if matches!(tracker.phase(), Phase::Tracking | Phase::Ending) {
            return Err(ClientError::InvalidState("return home"));
        }
        tracker.return_home();
        Ok(())
    }

    pub async fn shutdown(&self) {
        for handle in self.background.lock().await.drain(..) {
            handle.abort();
        }
        self.shared.stop_ticker().await;
        self.shared.pause_sync.cancel().await;
    }
}

impl<A: SessionApi> Drop for FocusClient<A> {
    fn drop(&mut self) {
        for handle in self.background.get_mut().drain(..) {
            handle.abort();
        }
    }
}

impl<A: SessionApi> Shared<A> {
    async fn reconcile_now(self: &Arc<Self>) -> ClientResult<Reconciled> {
        let sessions = self.api.active_sessions().await?;
        Ok(self.observe(&sessions).await)
    }

    async fn observe(self: &Arc<Self>, sessions: &[ActiveSession]) -> Reconciled {
        let (outcome, picked_up) = {
            let mut tracker = self.tracker.lock().await;
            (tracker.observe_sessions(sessions, Utc::now()), tracker.picked_up())
        };
        match outcome {
            Reconciled::Entered(session_id) => {
                info!(%session_id, "joined focus session");
                self.start_ticker().await;
                if picked_up {
                    self.schedule_pause_sync(session_id).await;
                }
            }
            Reconciled::EndedRemotely(session_id) => {
                info!(%session_id, "focus session ended by a participant");
                self.stop_ticker().await;
                self.pause_sync.cancel().await;
            }
            Reconciled::Updated | Reconciled::Unchanged => {}
        }
        outcome
    }

    async fn start_ticker(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.tick;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                shared.tracker.lock().await.tick();
            }
        });
        if let Some(previous) = self.ticker.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn stop_ticker(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.abort();
        }
    }

    async fn schedule_pause_sync(self: &Arc<Self>, session_id: Uuid) {
        let weak = Arc::downgrade(self);
        self.pause_sync
            .schedule(async move {
                if let Some(shared) = weak.upgrade() {
                    shared.sync_pause(session_id).await;
                }
            })
            .await;
    }

    async fn sync_pause(&self, session_id: Uuid) {
        let is_paused = {
            let tracker = self.tracker.lock().await;
            if !tracker.is_tracking() || tracker.session_id() != Some(session_id) {
                return;
            }
            tracker.picked_up()
        };
        match self.api.set_pause(session_id, is_paused).await {
            Ok(aggregate) => self
                .tracker
                .lock()
                .await
                .apply_aggregate(&aggregate, Utc::now()),
            Err(e) => warn!(%session_id, is_paused, error = %e, "pause sync failed"),
        }
    }

    async fn submit(&self, request: &FinalizeRequest) -> ClientResult<Saved> {
        match &request.target {
            FinalizeTarget::End { session_id } => {
                match self.api.end_session(*session_id, request.end_body()).await {
                    Ok(session) => Ok(Saved {
                        session_id: Some(session.id),
                        minutes: Some(session.minutes),
                    }),
                    Err(e) if e.is_already_ended() => {
                        debug!(%session_id, "session already finalized");
                        Ok(Saved {
                            session_id: Some(*session_id),
                            minutes: self.stored_minutes(*session_id).await,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            FinalizeTarget::Create { .. } => {
                let body = request
                    .create_body()
                    .ok_or(ClientError::InvalidState("create a session"))?;
                let session = self.api.create_session(body).await?;
                Ok(Saved {
                    session_id: Some(session.id),
                    minutes: Some(session.minutes),
                })
            }
        }
    }

    /// Minutes the server recorded for an already-completed session, if it is
    /// still in the recent-end window.
    async fn stored_minutes(&self, session_id: Uuid) -> Option<i32> {
        match self.api.active_sessions().await {
            Ok(sessions) => sessions
                .into_iter()
                .find(|s| s.id == session_id && !s.status.is_active())
                .map(|s| s.minutes),
            Err(e) => {
                debug!(%session_id, error = %e, "could not read back recorded minutes");
                None
            }
        }
    }

    /// Primary submission, then a backup check `backup_delay` later. A failed
    /// primary is retried once; a primary still in flight races the backup and
    /// the first success wins. Both send the same request.
    async fn finalize(self: &Arc<Self>, request: FinalizeRequest) -> FinalizeOutcome {
        let mut primary = {
            let shared = Arc::clone(self);
            let request = request.clone();
            tokio::spawn(async move { shared.submit(&request).await })
        };
        let backup_at = Instant::now() + self.config.backup_delay;

        let early = tokio::select! {
            joined = &mut primary => Some(flatten(joined)),
            _ = tokio::time::sleep_until(backup_at) => None,
        };

        let result = match early {
            Some(Ok(saved)) => Ok((saved, 1)),
            Some(Err(e)) => {
                warn!(error = %e, "finalize failed, retrying once");
                tokio::time::sleep_until(backup_at).await;
                self.submit(&request).await.map(|saved| (saved, 2))
            }
            None => {
                debug!("finalize still in flight, sending backup");
                self.race_backup(primary, &request)
                    .await
                    .map(|saved| (saved, 2))
            }
        };

        let mut tracker = self.tracker.lock().await;
        match result {
            Ok((saved, attempts)) => {
                info!(session_id = ?saved.session_id, minutes = ?saved.minutes, attempts, "focus session recorded");
                tracker.finalize_recorded(saved.session_id, saved.minutes, attempts);
            }
            Err(e) => {
                warn!(error = %e, "focus session could not be recorded");
                tracker.finalize_failed(e.to_string());
            }
        }
        match tracker.phase() {
            Phase::Finished(outcome) => outcome.clone(),
            _ => FinalizeOutcome::Failed {
                minutes: request.minutes,
                error: "finalization interrupted".to_string(),
            },
        }
    }

    async fn race_backup(
        &self,
        mut primary: JoinHandle<ClientResult<Saved>>,
        request: &FinalizeRequest,
    ) -> ClientResult<Saved> {
        let mut backup = Box::pin(self.submit(request));
        let raced = tokio::time::timeout(self.config.finalize_timeout, async {
            tokio::select! {
                saved = &mut backup => match saved {
                    Ok(saved) => Ok(saved),
                    Err(e) => flatten((&mut primary).await).map_err(|_| e),
                },
                joined = &mut primary => match flatten(joined) {
                    Ok(saved) => Ok(saved),
                    Err(_) => (&mut backup).await,
                },
            }
        })
        .await;
        primary.abort();
        raced.unwrap_or_else(|_| Err(ClientError::Transient("finalize timed out".to_string())))
    }
}

/// What the server holds after a successful submission.
#[derive(Debug, Clone, Copy)]
struct Saved {
    session_id: Option<Uuid>,
    minutes: Option<i32>,
}

fn flatten(joined: Result<ClientResult<Saved>, JoinError>) -> ClientResult<Saved> {
    joined.map_err(|e| ClientError::Transient(e.to_string()))?
}
