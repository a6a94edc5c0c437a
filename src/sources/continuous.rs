//! Long-lived listener shared by the accumulating sources.
//!
//! The listener outlives individual fetches: a fetch only makes sure it is
//! running, then waits a settle window and reports whether anything arrived.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, Instrument};

use crate::dispatch::Completion;
use crate::error::Error;
use crate::operation::OperationHandle;
use crate::unique_set::Keyed;

/// State shared between a listener task and the fetches that rely on it.
#[derive(Debug, Default)]
pub(crate) struct ListenerShared {
    arrivals: AtomicU64,
    running: AtomicBool,
    failure: Mutex<Option<Error>>,
}

impl ListenerShared {
    /// Record one applied arrival.
    pub(crate) fn arrived(&self) {
        self.arrivals.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn arrivals(&self) -> u64 {
        self.arrivals.load(Ordering::Acquire)
    }

    /// Record a transport failure for the next settling fetch to report.
    ///
    /// Updates the listener already queued stay valid.
    pub(crate) fn fail(&self, error: Error) {
        *self.failure.lock() = Some(error);
    }

    fn take_failure(&self) -> Option<Error> {
        self.failure.lock().take()
    }

    /// Wait `window`, then complete with whether arrivals moved past `before`.
    pub(crate) async fn settle<E>(&self, completion: Completion<E>, window: Duration, before: u64)
    where
        E: Keyed + Send + 'static,
    {
        tokio::time::sleep(window).await;
        match self.take_failure() {
            Some(error) => completion.fail(error),
            None => completion.complete(self.arrivals() > before),
        }
    }
}

/// Handle to a background listener task.
///
/// The guard scopes the listener's updates. It is only canceled by
/// [`stop`](Listener::stop); a listener whose transport failed simply ends,
/// and the next fetch starts a new one under the same guard.
#[derive(Debug, Default)]
pub(crate) struct Listener {
    guard: Option<OperationHandle>,
    shared: Arc<ListenerShared>,
}

impl Listener {
    pub(crate) fn is_running(&self) -> bool {
        self.guard.as_ref().is_some_and(|g| !g.is_canceled())
            && self.shared.running.load(Ordering::Acquire)
    }

    pub(crate) fn shared(&self) -> Arc<ListenerShared> {
        Arc::clone(&self.shared)
    }

    /// Spawn the listener built by `run` unless one is already running.
    ///
    /// `run` receives the guard for its updates.
    pub(crate) fn ensure_running<F, Fut>(&mut self, source: &'static str, run: F)
    where
        F: FnOnce(OperationHandle, Arc<ListenerShared>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            return;
        }
        let guard = self.guard.get_or_insert_with(OperationHandle::new).clone();
        let shared = Arc::clone(&self.shared);
        shared.running.store(true, Ordering::Release);
        let fut = run(guard.clone(), Arc::clone(&shared));
        let task = tokio::spawn(
            async move {
                fut.await;
                shared.running.store(false, Ordering::Release);
            }
            .instrument(tracing::debug_span!("listener", source)),
        );
        guard.abort_on_cancel(task);
        debug!(source, "listener started");
    }

    /// Stop the listener. Its queued updates are discarded.
    pub(crate) fn stop(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.cancel();
            debug!("listener stopped");
        }
        self.shared = Arc::default();
    }
}
