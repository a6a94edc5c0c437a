//! The discovery session: one source, one collection, one selection.
//!
//! A session is owned by the screen that shows it and driven from that
//! screen's task, the coordination thread. All state changes happen inside
//! the session's own methods; background work reaches it only through the
//! [`Dispatcher`] channel.
//!
//! ```ignore
//! let mut session = DiscoverySession::new(LanBroadcastSource::new(channel), renderer);
//! session.refresh()?;
//! session.settle().await;
//! for host in session.entries() { /* render */ }
//! ```

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::debounce::DebounceScheduler;
use crate::dispatch::{Dispatch, Dispatcher, SelectionReporter};
use crate::error::{Error, Result};
use crate::operation::OperationHandle;
use crate::sources::{ClearPolicy, Deletion, DiscoverySource};
use crate::unique_set::{Keyed, UniqueIndexedSet};

/// Key type of a source's entries.
pub type EntryKey<S> = <<S as DiscoverySource>::Entry as Keyed>::Key;

/// Where the session is in its fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No fetch has run yet, or the session was reset.
    Idle,
    /// A fetch is in flight.
    Fetching,
    /// The last fetch completed.
    Populated,
    /// The last fetch was canceled.
    Canceled,
    /// The last fetch failed.
    Failed,
    /// Torn down; no further fetches.
    Detached,
}

/// Renderer and error hook of a session.
///
/// All methods are called on the coordination thread.
pub trait SessionObserver<E: Keyed>: Send {
    /// The collection changed.
    fn entries_changed(&mut self, _entries: &UniqueIndexedSet<E>) {}

    /// A fetch completed. `changed` is true if the source reported a change
    /// or the collection size differs from before the refresh.
    fn fetch_completed(&mut self, _changed: bool) {}

    /// A fetch failed. Reported once per failed attempt.
    fn fetch_failed(&mut self, _source: &'static str, _error: &Error) {}

    /// The selection changed or was invalidated.
    fn selection_changed(&mut self, _selected: Option<&E>) {}

    /// A background accept or delete failed at the provider.
    fn action_failed(&mut self, _source: &'static str, _action: &'static str, _error: &Error) {}
}

impl<E: Keyed> SessionObserver<E> for () {}

#[derive(Debug, Clone)]
struct Selection<K> {
    key: K,
    index: usize,
}

/// Controller tying a [`DiscoverySource`] to its collection and selection.
pub struct DiscoverySession<S: DiscoverySource> {
    source: S,
    entries: UniqueIndexedSet<S::Entry>,
    state: SessionState,
    inflight: Option<OperationHandle>,
    baseline_len: usize,
    selection: Option<Selection<EntryKey<S>>>,
    debounce: Option<DebounceScheduler>,
    paused: bool,
    dispatcher: Dispatcher<S::Entry>,
    rx: mpsc::UnboundedReceiver<Dispatch<S::Entry>>,
    observer: Box<dyn SessionObserver<S::Entry>>,
}

impl<S: DiscoverySource> DiscoverySession<S> {
    /// Create a session and attach the source's subscriptions.
    ///
    /// Must be called inside a tokio runtime. No fetch is started.
    pub fn new<O>(mut source: S, observer: O) -> Self
    where
        O: SessionObserver<S::Entry> + 'static,
    {
        let (dispatcher, rx) = Dispatcher::channel();
        source.attach(&dispatcher);
        let debounce = source.push_debounce().map(DebounceScheduler::new);
        debug!(source = source.name(), "discovery session created");
        Self {
            source,
            entries: UniqueIndexedSet::new(),
            state: SessionState::Idle,
            inflight: None,
            baseline_len: 0,
            selection: None,
            debounce,
            paused: false,
            dispatcher,
            rx,
            observer: Box::new(observer),
        }
    }

    /// Cancel any in-flight fetch and start a new one.
    ///
    /// The superseded fetch's result is discarded even if it arrives later.
    /// The session tracks the fetch by its completion, so this holds whatever
    /// handle the source returns.
    pub fn refresh(&mut self) -> Result<()> {
        if self.state == SessionState::Detached {
            return Err(Error::Detached);
        }
        self.invalidate_selection();
        if let Some(op) = self.inflight.take() {
            if op.cancel() {
                debug!(source = self.source.name(), "superseded in-flight fetch");
            }
        }
        self.baseline_len = self.entries.len();
        if self.source.clear_policy() == ClearPolicy::OnRefresh && !self.entries.is_empty() {
            self.entries.clear();
            self.observer.entries_changed(&self.entries);
        }

        let completion = self.dispatcher.completion();
        let op = completion.handle();
        let returned = self.source.fetch(completion);
        if !returned.same_operation(&op) {
            op.on_cancel(move || {
                returned.cancel();
            });
        }
        self.inflight = Some(op);
        self.state = SessionState::Fetching;
        trace!(source = self.source.name(), "fetch started");
        Ok(())
    }

    /// Cancel the in-flight fetch, if any. Entries are kept.
    pub fn cancel(&mut self) -> bool {
        match self.inflight.take() {
            Some(op) => {
                op.cancel();
                if self.state == SessionState::Fetching {
                    self.state = SessionState::Canceled;
                }
                true
            }
            None => false,
        }
    }

    /// Cancel, drop continuous source state, and clear the collection.
    pub fn reset(&mut self) {
        self.cancel();
        self.source.reset();
        self.invalidate_selection();
        if !self.entries.is_empty() {
            self.entries.clear();
            self.observer.entries_changed(&self.entries);
        }
        if self.state != SessionState::Detached {
            self.state = SessionState::Idle;
        }
    }

    /// Tear down push subscriptions and the debounce timer.
    pub fn pause(&mut self) {
        if self.paused || self.state == SessionState::Detached {
            return;
        }
        self.paused = true;
        self.source.pause();
        if let Some(debounce) = self.debounce.as_mut() {
            debounce.cancel();
        }
        debug!(source = self.source.name(), "session paused");
    }

    /// Re-attach push subscriptions after [`pause`](Self::pause).
    pub fn resume(&mut self) {
        if !self.paused || self.state == SessionState::Detached {
            return;
        }
        self.paused = false;
        self.source.attach(&self.dispatcher);
        debug!(source = self.source.name(), "session resumed");
    }

    /// Release the in-flight fetch, subscriptions and timer.
    ///
    /// Messages still queued are discarded and no worker can reach the
    /// session afterwards. Idempotent; also run on drop.
    pub fn detach(&mut self) {
        if self.state == SessionState::Detached {
            return;
        }
        if let Some(op) = self.inflight.take() {
            op.cancel();
        }
        if let Some(debounce) = self.debounce.as_mut() {
            debounce.cancel();
        }
        self.source.detach();
        self.selection = None;
        self.state = SessionState::Detached;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        debug!(source = self.source.name(), "session detached");
    }

    /// Select the entry with `key`.
    pub fn select(&mut self, key: &EntryKey<S>) -> Result<()> {
        let index = self.entries.get_index(key).ok_or(Error::NotFound)?;
        self.selection = Some(Selection {
            key: key.clone(),
            index,
        });
        self.observer.selection_changed(self.entries.get(index));
        Ok(())
    }

    /// Drop the selection.
    pub fn clear_selection(&mut self) {
        self.invalidate_selection();
    }

    /// The selected entry.
    pub fn selected(&self) -> Option<&S::Entry> {
        self.selection
            .as_ref()
            .and_then(|sel| self.entries.get(sel.index))
    }

    /// Index of the selected entry.
    pub fn selected_index(&self) -> Option<usize> {
        self.selection.as_ref().map(|sel| sel.index)
    }

    /// True when accept/delete have a target.
    pub fn has_selection(&self) -> bool {
        self.selection.is_some()
    }

    /// Accept the selected entry through the source and return it.
    ///
    /// Providers that finish in the background report failures through
    /// [`SessionObserver::action_failed`].
    pub fn accept(&mut self) -> Result<S::Entry> {
        let entry = self.selected().cloned().ok_or(Error::NoSelection)?;
        self.source.accept(&entry, &self.dispatcher)?;
        debug!(source = self.source.name(), "entry accepted");
        Ok(entry)
    }

    /// Delete the selected entry through the source.
    ///
    /// The entry leaves the collection now if the source finished the
    /// deletion, or once the provider confirms it otherwise.
    pub fn delete(&mut self) -> Result<S::Entry> {
        let entry = self.selected().cloned().ok_or(Error::NoSelection)?;
        match self.source.delete(&entry, &self.dispatcher)? {
            Deletion::Done => {
                self.entries.remove_key(&entry.key());
                self.invalidate_selection();
                self.observer.entries_changed(&self.entries);
                debug!(source = self.source.name(), "entry deleted");
            }
            Deletion::Pending => {
                debug!(source = self.source.name(), "entry deletion requested");
            }
        }
        Ok(entry)
    }

    /// Callback for a rendered entry to report that the user selected it.
    pub fn selection_reporter(&self, key: EntryKey<S>) -> SelectionReporter<S::Entry> {
        self.dispatcher.selection_reporter(key)
    }

    /// The current collection.
    pub fn entries(&self) -> &UniqueIndexedSet<S::Entry> {
        &self.entries
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while a fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        self.state == SessionState::Fetching
    }

    /// True while a push-triggered refresh is scheduled.
    pub fn refresh_scheduled(&self) -> bool {
        self.debounce
            .as_ref()
            .is_some_and(DebounceScheduler::is_pending)
    }

    /// The source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// A dispatcher bound to this session.
    pub fn dispatcher(&self) -> Dispatcher<S::Entry> {
        self.dispatcher.clone()
    }

    /// Apply every queued message without waiting. Returns how many ran.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg);
            handled += 1;
        }
        handled
    }

    /// Wait for and apply one message. Returns `false` once detached.
    pub async fn process_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(msg) => {
                self.handle(msg);
                true
            }
            None => false,
        }
    }

    /// Apply messages until no fetch is in flight.
    pub async fn settle(&mut self) {
        while self.is_fetching() {
            if !self.process_next().await {
                break;
            }
        }
        self.process_pending();
    }

    fn handle(&mut self, msg: Dispatch<S::Entry>) {
        match msg {
            Dispatch::Update { guard, mutation } => {
                let entries = &mut self.entries;
                match guard.guard_with(|| mutation(entries)) {
                    Some(true) => self.entries_mutated(),
                    Some(false) => {}
                    None => trace!(source = self.source.name(), "dropped stale update"),
                }
            }
            Dispatch::Complete { op, outcome } => {
                if op.deliver_with(|| self.on_complete(outcome)).is_none() {
                    trace!(source = self.source.name(), "dropped stale completion");
                }
            }
            Dispatch::Push { subscription } => {
                if subscription.is_canceled() || self.paused {
                    trace!(source = self.source.name(), "dropped push from closed subscription");
                    return;
                }
                if let Some(debounce) = self.debounce.as_mut() {
                    let dispatcher = self.dispatcher.clone();
                    debounce.trigger(move || {
                        dispatcher.refresh_due();
                    });
                    trace!(source = self.source.name(), "push armed refresh timer");
                }
            }
            Dispatch::Refresh => {
                if self.paused {
                    return;
                }
                debug!(source = self.source.name(), "debounced refresh");
                if let Err(e) = self.refresh() {
                    trace!(error = %e, "debounced refresh skipped");
                }
            }
            Dispatch::Select { key } => {
                if self.select(&key).is_err() {
                    trace!(source = self.source.name(), "reported selection no longer present");
                }
            }
            Dispatch::ActionFailed { action, error } => {
                warn!(source = self.source.name(), action, error = %error, "provider action failed");
                self.observer.action_failed(self.source.name(), action, &error);
            }
        }
    }

    fn on_complete(&mut self, outcome: Result<bool>) {
        self.inflight = None;
        if let Some(debounce) = self.debounce.as_mut() {
            debounce.cancel();
        }
        match outcome {
            Ok(reported) => {
                let changed = reported || self.entries.len() != self.baseline_len;
                self.state = SessionState::Populated;
                debug!(
                    source = self.source.name(),
                    changed,
                    entries = self.entries.len(),
                    "fetch completed"
                );
                self.observer.fetch_completed(changed);
            }
            Err(e) => {
                self.state = SessionState::Failed;
                warn!(source = self.source.name(), error = %e, "fetch failed");
                self.observer.fetch_failed(self.source.name(), &e);
            }
        }
    }

    fn entries_mutated(&mut self) {
        let vanished = match self.selection.as_mut() {
            Some(sel) => match self.entries.get_index(&sel.key) {
                Some(index) => {
                    sel.index = index;
                    false
                }
                None => true,
            },
            None => false,
        };
        if vanished {
            self.invalidate_selection();
        }
        self.observer.entries_changed(&self.entries);
    }

    fn invalidate_selection(&mut self) {
        if self.selection.take().is_some() {
            self.observer.selection_changed(None);
        }
    }
}

impl<S: DiscoverySource> Drop for DiscoverySession<S> {
    fn drop(&mut self) {
        self.detach();
    }
}
