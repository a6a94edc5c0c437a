//! Marshalling of worker results onto the session's coordination thread.
//!
//! Workers never touch session state. They hold a [`Dispatcher`] (or one of
//! the narrower handles built from it) and post messages; the session applies
//! them when its owner drives it. Every message that belongs to an operation
//! carries that operation's handle and is dropped if the handle was canceled
//! by the time it is applied.

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::operation::OperationHandle;
use crate::unique_set::{Keyed, UniqueIndexedSet};

/// A mutation of the entry collection. Returns `true` if anything changed.
pub type Mutation<E> = Box<dyn FnOnce(&mut UniqueIndexedSet<E>) -> bool + Send>;

pub(crate) enum Dispatch<E: Keyed> {
    Update {
        guard: OperationHandle,
        mutation: Mutation<E>,
    },
    Complete {
        op: OperationHandle,
        outcome: Result<bool>,
    },
    Push {
        subscription: OperationHandle,
    },
    Refresh,
    Select {
        key: E::Key,
    },
    ActionFailed {
        action: &'static str,
        error: Error,
    },
}

/// Cloneable sender side of a session's coordination channel.
pub struct Dispatcher<E: Keyed> {
    tx: mpsc::UnboundedSender<Dispatch<E>>,
}

impl<E: Keyed> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> Dispatcher<E>
where
    E: Keyed + Send + 'static,
{
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Dispatch<E>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn post(&self, msg: Dispatch<E>) -> bool {
        if self.tx.send(msg).is_err() {
            trace!("dispatch: session gone, message dropped");
            return false;
        }
        true
    }

    /// Start a new operation and return its completion.
    pub fn completion(&self) -> Completion<E> {
        Completion::new(OperationHandle::new(), self.clone())
    }

    /// An updater whose mutations are dropped once `guard` is canceled.
    pub fn updater(&self, guard: OperationHandle) -> Updater<E> {
        Updater {
            guard,
            dispatcher: self.clone(),
        }
    }

    /// Report a qualifying push notification from `subscription`.
    pub fn push_notification(&self, subscription: &OperationHandle) -> bool {
        if subscription.is_canceled() {
            return false;
        }
        self.post(Dispatch::Push {
            subscription: subscription.clone(),
        })
    }

    pub(crate) fn refresh_due(&self) -> bool {
        self.post(Dispatch::Refresh)
    }

    /// Remove the entry with `key`, for actions confirmed after they returned.
    pub fn remove_entry(&self, key: E::Key) -> bool {
        self.post(Dispatch::Update {
            guard: OperationHandle::new(),
            mutation: Box::new(move |entries| entries.remove_key(&key).is_some()),
        })
    }

    /// Report that a background `action` (accept, delete) failed.
    pub fn action_failed(&self, action: &'static str, error: Error) -> bool {
        self.post(Dispatch::ActionFailed { action, error })
    }

    /// A callback a rendered entry uses to report that the user selected it.
    pub fn selection_reporter(&self, key: E::Key) -> SelectionReporter<E> {
        SelectionReporter {
            key,
            dispatcher: self.clone(),
        }
    }

    /// True once the owning session has been detached or dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Posts guarded collection mutations.
pub struct Updater<E: Keyed> {
    guard: OperationHandle,
    dispatcher: Dispatcher<E>,
}

impl<E: Keyed> Clone for Updater<E> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<E> Updater<E>
where
    E: Keyed + Send + 'static,
{
    /// Queue `mutation`. Returns `false` if it can no longer take effect.
    pub fn apply<F>(&self, mutation: F) -> bool
    where
        F: FnOnce(&mut UniqueIndexedSet<E>) -> bool + Send + 'static,
    {
        if self.guard.is_canceled() {
            return false;
        }
        self.dispatcher.post(Dispatch::Update {
            guard: self.guard.clone(),
            mutation: Box::new(mutation),
        })
    }

    /// Insert or replace `entry` in place.
    pub fn upsert(&self, entry: E) -> bool {
        self.apply(move |entries| {
            entries.add_or_update(entry);
            true
        })
    }

    /// Replace the whole collection with `items`, keeping the first of any
    /// duplicates.
    pub fn replace_all(&self, items: Vec<E>) -> bool {
        self.apply(move |entries| {
            let had_entries = !entries.is_empty();
            entries.clear();
            let mut added = false;
            for item in items {
                added |= entries.add(item);
            }
            had_entries || added
        })
    }

    /// True once the guarding operation has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.guard.is_canceled()
    }
}

/// The single completion of one fetch.
///
/// Consumed by [`complete`](Completion::complete) or
/// [`fail`](Completion::fail). Dropping it unfinished reports an unchanged
/// collection, so the session always leaves its fetching state.
pub struct Completion<E>
where
    E: Keyed + Send + 'static,
{
    op: OperationHandle,
    dispatcher: Dispatcher<E>,
    finished: bool,
}

impl<E> Completion<E>
where
    E: Keyed + Send + 'static,
{
    fn new(op: OperationHandle, dispatcher: Dispatcher<E>) -> Self {
        Self {
            op,
            dispatcher,
            finished: false,
        }
    }

    /// The operation this completion belongs to.
    pub fn handle(&self) -> OperationHandle {
        self.op.clone()
    }

    /// True once the fetch was canceled. Workers may stop early.
    pub fn is_canceled(&self) -> bool {
        self.op.is_canceled()
    }

    /// Updater guarded by this fetch.
    pub fn updater(&self) -> Updater<E> {
        self.dispatcher.updater(self.op.clone())
    }

    /// The session dispatcher, for workers that outlive this fetch.
    pub fn dispatcher(&self) -> &Dispatcher<E> {
        &self.dispatcher
    }

    /// Report success.
    pub fn complete(self, changed: bool) {
        self.finish(Ok(changed));
    }

    /// Report a failed fetch.
    pub fn fail(self, error: Error) {
        self.finish(Err(error));
    }

    /// Report `outcome`.
    pub fn finish(mut self, outcome: Result<bool>) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: Result<bool>) {
        self.finished = true;
        self.dispatcher.post(Dispatch::Complete {
            op: self.op.clone(),
            outcome,
        });
    }
}

impl<E> Drop for Completion<E>
where
    E: Keyed + Send + 'static,
{
    fn drop(&mut self) {
        if !self.finished {
            trace!("dispatch: completion dropped unfinished");
            self.send(Ok(false));
        }
    }
}

/// Reports a user selection made on a rendered entry.
pub struct SelectionReporter<E: Keyed> {
    key: E::Key,
    dispatcher: Dispatcher<E>,
}

impl<E: Keyed> Clone for SelectionReporter<E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<E> SelectionReporter<E>
where
    E: Keyed + Send + 'static,
{
    /// Ask the session to select this entry.
    pub fn report(&self) -> bool {
        self.dispatcher.post(Dispatch::Select {
            key: self.key.clone(),
        })
    }
}
