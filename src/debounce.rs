//! Coalesces bursts of trigger events into one delayed action.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::trace;

use crate::operation::{CancelableOperation, OperationHandle};

/// Single-shot, re-armable delay.
///
/// Every [`trigger`](DebounceScheduler::trigger) cancels the pending timer
/// and arms a new one, so at most one action is ever pending and it fires
/// one window after the last trigger.
#[derive(Debug)]
pub struct DebounceScheduler {
    window: Duration,
    last_trigger: Option<Instant>,
    pending: Option<OperationHandle>,
}

impl DebounceScheduler {
    /// Create a scheduler with the given quiet window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_trigger: None,
            pending: None,
        }
    }

    /// The quiet window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a trigger and (re)arm the timer to run `action`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn trigger<F>(&mut self, action: F) -> OperationHandle
    where
        F: FnOnce() + Send + 'static,
    {
        if self.cancel() {
            trace!("debounce: re-armed pending timer");
        }
        let now = Instant::now();
        self.last_trigger = Some(now);

        let op = CancelableOperation::new(move |()| action());
        let handle = op.handle();
        let deadline = now + self.window;
        let task = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            op.execute();
        });
        handle.abort_on_cancel(task);
        self.pending = Some(handle.clone());
        handle
    }

    /// Cancel the pending timer. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some_and(|handle| handle.cancel())
    }

    /// True while a timer is armed and has not fired.
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(OperationHandle::is_active)
    }

    /// Time of the most recent trigger.
    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }

    /// When the pending timer will fire.
    pub fn deadline(&self) -> Option<Instant> {
        if self.is_pending() {
            self.last_trigger.map(|t| t + self.window)
        } else {
            None
        }
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_fires_once_after_last_trigger() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _keep_open = tx.clone();
        let mut debounce = DebounceScheduler::new(Duration::from_secs(10));

        for _ in 0..3 {
            let tx = tx.clone();
            debounce.trigger(move || {
                let _ = tx.send(Instant::now());
            });
            sleep(Duration::from_secs(3)).await;
        }
        let last = debounce.last_trigger().expect("triggered");
        assert_eq!(debounce.deadline(), Some(last + Duration::from_secs(10)));

        let fired_at = rx.recv().await.expect("timer should fire");
        let waited = fired_at - last;
        assert!(waited >= Duration::from_secs(10));
        assert!(waited < Duration::from_secs(10) + Duration::from_millis(5));
        assert!(!debounce.is_pending());

        assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let _keep_open = tx.clone();
        let mut debounce = DebounceScheduler::new(Duration::from_secs(1));

        debounce.trigger(move || {
            let _ = tx.send(());
        });
        assert!(debounce.is_pending());
        assert!(debounce.cancel());
        assert!(!debounce.is_pending());
        assert!(!debounce.cancel());

        assert!(timeout(Duration::from_secs(5), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let _keep_open = tx.clone();
        {
            let mut debounce = DebounceScheduler::new(Duration::from_secs(1));
            debounce.trigger(move || {
                let _ = tx.send(());
            });
        }
        assert!(timeout(Duration::from_secs(5), rx.recv()).await.is_err());
    }
}
