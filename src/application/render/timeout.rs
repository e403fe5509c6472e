use std::time::Duration;

use tokio::task::JoinHandle;

/// Single-shot timer bound to one in-flight render.
///
/// The expiry callback runs at most once. Disarming, or dropping the guard,
/// aborts the timer task so nothing fires afterwards. Replacing a slot's guard
/// with a freshly armed one therefore never stacks timers.
pub(crate) struct TimeoutGuard {
    bound: Duration,
    task: Option<JoinHandle<()>>,
}

impl TimeoutGuard {
    /// Start the timer. Must be called from within a Tokio runtime.
    pub(crate) fn arm<F>(bound: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(bound).await;
            on_expiry();
        });
        Self {
            bound,
            task: Some(task),
        }
    }

    pub(crate) fn bound(&self) -> Duration {
        self.bound
    }

    pub(crate) fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}
