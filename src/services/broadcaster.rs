//! Session status fan-out: a point-in-time snapshot, and a per-subscriber
//! stream that re-runs the same query on a fixed interval.

use chrono::{Duration, Utc};
use futures::stream::{self, Stream};
use std::sync::Arc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ActiveSession, StreamMessage};
use crate::repositories::FocusStore;

#[derive(Clone)]
pub struct SessionBroadcaster {
    store: Arc<dyn FocusStore>,
    recent_end_window: Duration,
    interval: std::time::Duration,
}

/// Logs the end of a subscription when its stream is dropped.
struct SubscriptionGuard {
    user_id: Uuid,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        debug!(user_id = %self.user_id, "session status stream closed");
    }
}

impl SessionBroadcaster {
    pub fn new(
        store: Arc<dyn FocusStore>,
        recent_end_window: std::time::Duration,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            recent_end_window: Duration::from_std(recent_end_window)
                .unwrap_or(Duration::seconds(60)),
            interval,
        }
    }

    pub fn interval(&self) -> std::time::Duration {
        self.interval
    }

    /// Sessions of `user_id` that are active or ended within the recent-end window.
    pub async fn snapshot(&self, user_id: Uuid) -> AppResult<Vec<ActiveSession>> {
        let ended_since = Utc::now() - self.recent_end_window;
        self.store.sessions_for_user(user_id, ended_since).await
    }

    /// One `session_status` message per interval, starting immediately. Failed
    /// ticks are logged and skipped. Dropping the stream releases the timer.
    pub fn subscribe(&self, user_id: Uuid) -> impl Stream<Item = StreamMessage> + Send + 'static {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(user_id = %user_id, "session status stream opened");

        let state = (self.clone(), ticker, SubscriptionGuard { user_id });
        stream::unfold(state, |(this, mut ticker, guard)| async move {
            loop {
                ticker.tick().await;
                match this.snapshot(guard.user_id).await {
                    Ok(sessions) => {
                        let msg = StreamMessage::SessionStatus { sessions };
                        return Some((msg, (this, ticker, guard)));
                    }
                    Err(e) => {
                        warn!(user_id = %guard.user_id, error = %e, "session status tick failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewSession, SessionStatus};
    use crate::repositories::MemoryStore;
    use futures::StreamExt;

    async fn create(store: &MemoryStore, users: &[Uuid]) -> Uuid {
        let now = Utc::now();
        store
            .create_session(NewSession {
                user_ids: users.to_vec(),
                status: SessionStatus::Active,
                start_time: now,
                end_time: now + Duration::hours(1),
                minutes: 0,
                pair: None,
                client_ref: None,
            })
            .await
            .unwrap()
            .id
    }

    fn broadcaster(store: Arc<MemoryStore>) -> SessionBroadcaster {
        SessionBroadcaster::new(
            store,
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn snapshot_includes_recently_ended_only() {
        let store = Arc::new(MemoryStore::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let active = create(&store, &[a, b]).await;
        let recent = create(&store, &[a, b]).await;
        let old = create(&store, &[a]).await;
        let other = create(&store, &[b]).await;
        store.end_session(recent, Utc::now(), 10).await.unwrap();
        store
            .end_session(old, Utc::now() - Duration::minutes(10), 10)
            .await
            .unwrap();

        let ids: Vec<Uuid> = broadcaster(store.clone())
            .snapshot(a)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert!(ids.contains(&active));
        assert!(ids.contains(&recent));
        assert!(!ids.contains(&old));
        assert!(!ids.contains(&other));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_emits_on_every_interval() {
        let store = Arc::new(MemoryStore::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let broadcaster = broadcaster(store.clone());
        let mut stream = Box::pin(broadcaster.subscribe(a));

        let first = stream.next().await.unwrap().into_sessions();
        assert!(first.is_empty());

        let id = create(&store, &[a, b]).await;
        let second = stream.next().await.unwrap().into_sessions();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, id);
        assert!(!second[0].is_paused);

        store.set_participant_pause(id, b, true).await.unwrap();
        let third = stream.next().await.unwrap().into_sessions();
        assert!(third[0].is_paused);
        assert!(third[0].paused_by_others(a));
    }
}
