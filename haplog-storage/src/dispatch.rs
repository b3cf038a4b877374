use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Notify;

/// Tracks how far the derived per-topic-queue dispatcher lags behind the
/// canonical log.
///
/// A real broker derives topic-queue offsets from the commit log
/// asynchronously; `dispatch_behind_bytes` is how `changeToLeader` knows
/// whether there is unindexed tail to validate, and `wait_dispatch_caught_up`
/// is how it blocks until that tail has drained before appending a new
/// epoch. This reference implementation exposes `advance_to`/`set_target` so
/// tests can drive the dispatcher deterministically instead of racing a
/// background task.
pub struct DispatchTracker {
    target: AtomicI64,
    dispatched: AtomicI64,
    notify: Notify,
}

impl DispatchTracker {
    pub fn new() -> Self {
        Self {
            target: AtomicI64::new(0),
            dispatched: AtomicI64::new(0),
            notify: Notify::new(),
        }
    }

    /// Record that the log has grown to `target` bytes; the dispatcher now
    /// has that much to catch up on.
    pub fn set_target(&self, target: u64) {
        self.target.store(target as i64, Ordering::Release);
    }

    /// Record dispatcher progress up to `dispatched` bytes, waking any
    /// waiter if it has now caught up.
    pub fn advance_to(&self, dispatched: u64) {
        self.dispatched.store(dispatched as i64, Ordering::Release);
        if self.behind() <= 0 {
            self.notify.notify_waiters();
        }
    }

    /// Mark the dispatcher fully caught up to the current target.
    pub fn catch_up(&self) {
        let target = self.target.load(Ordering::Acquire);
        self.advance_to(target as u64);
    }

    pub fn behind(&self) -> i64 {
        self.target.load(Ordering::Acquire) - self.dispatched.load(Ordering::Acquire)
    }

    pub async fn wait_caught_up(&self) {
        loop {
            if self.behind() <= 0 {
                return;
            }
            let notified = self.notify.notified();
            if self.behind() <= 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for DispatchTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_when_caught_up() {
        let tracker = DispatchTracker::new();
        tracker.wait_caught_up().await;
    }

    #[tokio::test]
    async fn wait_unblocks_after_advance() {
        let tracker = std::sync::Arc::new(DispatchTracker::new());
        tracker.set_target(100);
        let waiter = tracker.clone();
        let handle = tokio::spawn(async move { waiter.wait_caught_up().await });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        tracker.catch_up();
        handle.await.unwrap();
    }
}
