//! Trailing-edge debounce for pause sync.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Runs only the last of a burst of scheduled jobs, `delay` after it was
/// scheduled. Scheduling again before the delay elapses aborts the previous job.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub async fn schedule<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        });
        if let Some(previous) = self.pending.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn cancel(&self) {
        if let Some(previous) = self.pending.lock().await.take() {
            previous.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(previous) = self.pending.get_mut().take() {
            previous.abort();
        }
    }
}
