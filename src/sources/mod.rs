//! Pluggable discovery sources.
//!
//! - One-shot sources replace the collection on every fetch
//!   ([`SocialInvitationSource`], [`CloudInvitationSource`], [`LobbyListingSource`])
//! - Continuous sources accumulate across fetches until reset
//!   ([`LanBroadcastSource`], [`PeerServiceDiscoverySource`])

pub mod cloud;
mod continuous;
pub mod lan;
pub mod lobby;
pub mod peer;
pub mod social;

use std::time::Duration;

pub use cloud::{CloudClient, CloudInvitation, CloudInvitationSource, PushEvent};
pub use lan::{BroadcastChannel, LanBroadcastSource, LanHost};
pub use lobby::{LobbyClient, LobbyListingSource, LobbyPage, LobbyRoom};
pub use peer::{PeerBrowser, PeerHost, PeerRecord, PeerServiceDiscoverySource};
pub use social::{SocialClient, SocialInvitation, SocialInvitationSource};

use crate::dispatch::{Completion, Dispatcher};
use crate::error::{Error, Result};
use crate::operation::OperationHandle;
use crate::unique_set::Keyed;

/// What a refresh does to the existing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearPolicy {
    /// Discard everything before fetching.
    OnRefresh,
    /// Keep entries; only an explicit reset clears them.
    Retain,
}

/// How far [`DiscoverySource::delete`] got before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    /// Deleted; the session drops the entry now.
    Done,
    /// Sent to the provider. The source removes the entry through the
    /// dispatcher once confirmed, or reports the failure.
    Pending,
}

/// A pluggable discovery channel.
///
/// The session calls [`fetch()`](DiscoverySource::fetch) once per refresh and
/// keeps the returned handle to cancel it. Implementors do their work on
/// background tasks and report through the [`Completion`]; they must not
/// block the caller.
pub trait DiscoverySource: Send + 'static {
    /// The discovered item.
    type Entry: Keyed + Clone + Send + 'static;

    /// Human-readable name for logging (e.g. "lan", "social").
    fn name(&self) -> &'static str;

    /// How a refresh treats existing entries. Default: clear.
    fn clear_policy(&self) -> ClearPolicy {
        ClearPolicy::OnRefresh
    }

    /// Start a fetch. Results are posted through `completion`.
    fn fetch(&mut self, completion: Completion<Self::Entry>) -> OperationHandle;

    /// Quiet window for push-triggered refreshes, if the source has pushes.
    fn push_debounce(&self) -> Option<Duration> {
        None
    }

    /// (Re)start long-lived subscriptions. Called on session creation and resume.
    fn attach(&mut self, _dispatcher: &Dispatcher<Self::Entry>) {}

    /// Tear down long-lived subscriptions.
    fn pause(&mut self) {}

    /// Drop continuous state (listeners, pending partial records).
    fn reset(&mut self) {}

    /// Final teardown.
    fn detach(&mut self) {
        self.pause();
        self.reset();
    }

    /// Act on the user accepting `entry`.
    ///
    /// Work that finishes in the background reports failures through
    /// [`Dispatcher::action_failed`].
    fn accept(
        &mut self,
        _entry: &Self::Entry,
        _dispatcher: &Dispatcher<Self::Entry>,
    ) -> Result<()> {
        Ok(())
    }

    /// Act on the user deleting `entry`.
    fn delete(
        &mut self,
        _entry: &Self::Entry,
        _dispatcher: &Dispatcher<Self::Entry>,
    ) -> Result<Deletion> {
        Err(Error::Unsupported("delete"))
    }
}
