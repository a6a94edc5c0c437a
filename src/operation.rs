//! One-shot cancelable operations.
//!
//! An [`OperationHandle`] is the cancellation side of a single unit of work
//! (a fetch, a timer, a listener). A [`CancelableQuery`] pairs a handle with
//! a result handler and delivers at most once, never after `cancel()`.
//!
//! Delivery and cancellation are serialized by one lock: a `cancel()` that
//! returns before `run()` starts always suppresses it, and a racing pair
//! resolves to exactly one of delivered or suppressed.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::task::JoinHandle;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Lifecycle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Not yet delivered and not canceled.
    Active,
    /// The result was delivered; further deliveries are no-ops.
    Consumed,
    /// Canceled. Terminal.
    Canceled,
}

struct Inner {
    state: OperationState,
    cleanups: Vec<Cleanup>,
}

/// Cancellation handle for one in-flight operation.
///
/// Clones share state. Cancelling any clone cancels the operation.
#[derive(Clone)]
pub struct OperationHandle {
    // Reentrant so a delivery may cancel its own operation.
    inner: Arc<ReentrantMutex<RefCell<Inner>>>,
}

impl OperationHandle {
    /// Create a new active handle.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ReentrantMutex::new(RefCell::new(Inner {
                state: OperationState::Active,
                cleanups: Vec::new(),
            }))),
        }
    }

    /// Current state.
    pub fn state(&self) -> OperationState {
        self.inner.lock().borrow().state
    }

    /// True once `cancel()` has been called.
    pub fn is_canceled(&self) -> bool {
        self.state() == OperationState::Canceled
    }

    /// True while the operation may still deliver.
    pub fn is_active(&self) -> bool {
        self.state() == OperationState::Active
    }

    /// True if both handles control the same operation.
    pub fn same_operation(&self, other: &OperationHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a hook to run when the operation is canceled.
    ///
    /// Runs immediately if the handle is already canceled.
    pub fn on_cancel<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if inner.state == OperationState::Canceled {
            drop(inner);
            drop(guard);
            f();
        } else {
            inner.cleanups.push(Box::new(f));
        }
    }

    /// Abort `task` when this operation is canceled.
    pub fn abort_on_cancel<T>(&self, task: JoinHandle<T>)
    where
        T: Send + 'static,
    {
        self.on_cancel(move || task.abort());
    }

    /// Cancel the operation. Idempotent.
    ///
    /// Returns `true` if a pending delivery was suppressed by this call.
    /// Cleanup hooks run exactly once, on the first call.
    pub fn cancel(&self) -> bool {
        let guard = self.inner.lock();
        let (was_active, cleanups) = {
            let mut inner = guard.borrow_mut();
            if inner.state == OperationState::Canceled {
                return false;
            }
            let was_active = inner.state == OperationState::Active;
            inner.state = OperationState::Canceled;
            (was_active, std::mem::take(&mut inner.cleanups))
        };
        drop(guard);
        for cleanup in cleanups {
            cleanup();
        }
        was_active
    }

    /// Run `f` as this operation's single delivery.
    ///
    /// Returns `None` without calling `f` if the operation was canceled or
    /// already delivered. The lock is held while `f` runs, so a concurrent
    /// `cancel()` waits for the delivery to finish.
    pub fn deliver_with<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let guard = self.inner.lock();
        {
            let mut inner = guard.borrow_mut();
            if inner.state != OperationState::Active {
                return None;
            }
            inner.state = OperationState::Consumed;
        }
        let out = f();
        drop(guard);
        Some(out)
    }

    /// Run `f` unless the operation was canceled, without consuming it.
    ///
    /// Used for the intermediate updates a fetch posts before it completes.
    pub fn guard_with<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let guard = self.inner.lock();
        if guard.borrow().state == OperationState::Canceled {
            return None;
        }
        let out = f();
        drop(guard);
        Some(out)
    }
}

impl Default for OperationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("state", &self.state())
            .finish()
    }
}

type Handler<T> = Box<dyn FnOnce(T) + Send>;

struct QueryInner<T> {
    handle: OperationHandle,
    handler: Mutex<Option<Handler<T>>>,
}

/// A cancelable single-result callback.
///
/// Wraps any handler and enforces at-most-once delivery with no delivery
/// after cancellation. Clones share the same operation.
pub struct CancelableQuery<T> {
    inner: Arc<QueryInner<T>>,
}

impl<T> Clone for CancelableQuery<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> CancelableQuery<T> {
    /// Wrap `handler` in a fresh operation.
    pub fn new<F>(handler: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self::with_handle(OperationHandle::new(), handler)
    }

    /// Wrap `handler`, cancelable through an existing handle.
    pub fn with_handle<F>(handle: OperationHandle, handler: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            inner: Arc::new(QueryInner {
                handle,
                handler: Mutex::new(Some(Box::new(handler))),
            }),
        }
    }

    /// Deliver `result` to the handler. Returns `true` if it was delivered.
    pub fn run(&self, result: T) -> bool {
        self.inner
            .handle
            .deliver_with(|| {
                let handler = self.inner.handler.lock().take();
                if let Some(handler) = handler {
                    handler(result);
                }
            })
            .is_some()
    }

    /// Cancel the query. Returns `true` if a pending delivery was suppressed.
    pub fn cancel(&self) -> bool {
        let suppressed = self.inner.handle.cancel();
        self.inner.handler.lock().take();
        suppressed
    }

    /// The underlying operation handle.
    pub fn handle(&self) -> OperationHandle {
        self.inner.handle.clone()
    }
}

/// A cancelable no-argument action.
pub type CancelableOperation = CancelableQuery<()>;

impl CancelableQuery<()> {
    /// Run the action. Returns `true` if it ran.
    pub fn execute(&self) -> bool {
        self.run(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    fn counting_query() -> (CancelableQuery<u32>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let query = CancelableQuery::new(move |_: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (query, hits)
    }

    #[test]
    fn delivers_once() {
        let (query, hits) = counting_query();
        assert!(query.run(1));
        assert!(!query.run(2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(query.handle().state(), OperationState::Consumed);
    }

    #[test]
    fn cancel_before_run_suppresses() {
        let (query, hits) = counting_query();
        assert!(query.cancel());
        assert!(!query.run(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_on_other_thread_happens_before_run() {
        let (query, hits) = counting_query();
        let remote = query.clone();
        thread::spawn(move || remote.cancel())
            .join()
            .expect("cancel thread panicked");
        assert!(!query.run(7));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_is_idempotent_and_cleans_up_once() {
        let handle = OperationHandle::new();
        let cleaned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cleaned);
        handle.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert!(handle.is_canceled());
    }

    #[test]
    fn on_cancel_after_cancel_runs_immediately() {
        let handle = OperationHandle::new();
        handle.cancel();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        handle.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_after_delivery_reports_nothing_suppressed() {
        let (query, hits) = counting_query();
        assert!(query.run(3));
        assert!(!query.cancel());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_cancel_its_own_operation() {
        let handle = OperationHandle::new();
        let inner = handle.clone();
        let query = CancelableQuery::with_handle(handle.clone(), move |_: ()| {
            inner.cancel();
        });
        assert!(query.run(()));
        assert!(handle.is_canceled());
    }

    #[test]
    fn clones_share_identity() {
        let handle = OperationHandle::new();
        assert!(handle.same_operation(&handle.clone()));
        assert!(!handle.same_operation(&OperationHandle::new()));
    }

    #[test]
    fn guard_with_allows_repeated_updates_until_canceled() {
        let handle = OperationHandle::new();
        assert_eq!(handle.guard_with(|| 1), Some(1));
        assert_eq!(handle.guard_with(|| 2), Some(2));
        assert!(handle.is_active());
        handle.cancel();
        assert_eq!(handle.guard_with(|| 3), None);
    }

    #[test]
    fn racing_cancel_and_run_resolve_to_exactly_one_outcome() {
        for _ in 0..500 {
            let (query, hits) = counting_query();
            let barrier = Arc::new(Barrier::new(2));

            let runner = {
                let query = query.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    query.run(1)
                })
            };
            let canceller = {
                let query = query.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    query.cancel()
                })
            };

            let delivered = runner.join().expect("runner panicked");
            let suppressed = canceller.join().expect("canceller panicked");
            assert!(delivered ^ suppressed, "exactly one outcome expected");
            assert_eq!(hits.load(Ordering::SeqCst), usize::from(delivered));
        }
    }

    #[test]
    fn cancelable_operation_executes() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let op: CancelableOperation = CancelableQuery::new(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(op.execute());
        assert!(!op.execute());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
