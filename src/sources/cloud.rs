//! Invitations from a cloud multiplayer service, with push updates.
//!
//! Push notifications never touch the list. Each qualifying one re-arms the
//! session's debounce timer, which eventually runs an ordinary refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::{debug, trace, warn, Instrument};

use crate::config::DiscoveryConfig;
use crate::dispatch::{Completion, Dispatcher};
use crate::error::Result;
use crate::operation::OperationHandle;
use crate::unique_set::Keyed;

use super::{Deletion, DiscoverySource};

/// An invitation held by the cloud service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudInvitation {
    /// Service invitation id.
    pub id: String,
    /// Display name of the inviting player.
    pub inviter: String,
    /// Room the invitation points to.
    pub room: String,
}

impl Keyed for CloudInvitation {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// A push notification from the cloud service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A new invitation arrived.
    InvitationReceived {
        /// Invitation id.
        id: String,
    },
    /// An invitation was withdrawn or expired.
    InvitationRemoved {
        /// Invitation id.
        id: String,
    },
    /// Anything else (presence, chat).
    Other,
}

impl PushEvent {
    /// True if the event should schedule a refresh.
    pub fn qualifies(&self) -> bool {
        !matches!(self, PushEvent::Other)
    }
}

/// Provider client for cloud invitations.
#[async_trait]
pub trait CloudClient: Send + Sync + 'static {
    /// Fetch all pending invitations.
    async fn invitations(&self) -> Result<Vec<CloudInvitation>>;

    /// Subscribe to push notifications. The stream ends when dropped.
    fn subscribe(&self) -> BoxStream<'static, PushEvent>;

    /// Accept an invitation.
    async fn accept(&self, id: &str) -> Result<()>;

    /// Decline an invitation.
    async fn decline(&self, id: &str) -> Result<()>;
}

/// One-shot fetch plus push subscription over a [`CloudClient`].
pub struct CloudInvitationSource<C> {
    client: Arc<C>,
    debounce: Duration,
    subscription: Option<OperationHandle>,
}

impl<C: CloudClient> CloudInvitationSource<C> {
    /// Create a source with the default debounce window.
    pub fn new(client: C) -> Self {
        Self::with_config(client, &DiscoveryConfig::default())
    }

    /// Create a source from shared options.
    pub fn with_config(client: C, config: &DiscoveryConfig) -> Self {
        Self {
            client: Arc::new(client),
            debounce: config.push_debounce,
            subscription: None,
        }
    }

    /// Set the push debounce window. Default: 10s.
    pub fn debounce(mut self, d: Duration) -> Self {
        self.debounce = d;
        self
    }

    /// True while the push subscription is live.
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|sub| !sub.is_canceled())
    }
}

impl<C: CloudClient> DiscoverySource for CloudInvitationSource<C> {
    type Entry = CloudInvitation;

    fn name(&self) -> &'static str {
        "cloud"
    }

    fn fetch(&mut self, completion: Completion<CloudInvitation>) -> OperationHandle {
        let handle = completion.handle();
        let client = Arc::clone(&self.client);

        let task = tokio::spawn(
            async move {
                match client.invitations().await {
                    Ok(invitations) => {
                        debug!(count = invitations.len(), "cloud invitations received");
                        let changed = !invitations.is_empty();
                        completion.updater().replace_all(invitations);
                        completion.complete(changed);
                    }
                    Err(e) => completion.fail(e),
                }
            }
            .instrument(tracing::debug_span!("cloud_fetch")),
        );
        handle.abort_on_cancel(task);
        handle
    }

    fn push_debounce(&self) -> Option<Duration> {
        Some(self.debounce)
    }

    fn attach(&mut self, dispatcher: &Dispatcher<CloudInvitation>) {
        if self.is_subscribed() {
            return;
        }
        let subscription = OperationHandle::new();
        let mut events = self.client.subscribe();
        let dispatcher = dispatcher.clone();
        let sub = subscription.clone();

        let task = tokio::spawn(
            async move {
                while let Some(event) = events.next().await {
                    if !event.qualifies() {
                        trace!(?event, "ignoring push event");
                        continue;
                    }
                    trace!(?event, "qualifying push event");
                    if !dispatcher.push_notification(&sub) {
                        break;
                    }
                }
                debug!("push subscription ended");
            }
            .instrument(tracing::debug_span!("cloud_push")),
        );
        subscription.abort_on_cancel(task);
        self.subscription = Some(subscription);
        debug!("cloud push subscription attached");
    }

    fn pause(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.cancel();
            debug!("cloud push subscription torn down");
        }
    }

    fn accept(
        &mut self,
        entry: &CloudInvitation,
        dispatcher: &Dispatcher<CloudInvitation>,
    ) -> Result<()> {
        let client = Arc::clone(&self.client);
        let dispatcher = dispatcher.clone();
        let id = entry.id.clone();
        tokio::spawn(
            async move {
                if let Err(e) = client.accept(&id).await {
                    warn!(error = %e, "cloud invitation accept failed");
                    dispatcher.action_failed("accept", e);
                }
            }
            .instrument(tracing::debug_span!("cloud_accept", id = %entry.id)),
        );
        Ok(())
    }

    fn delete(
        &mut self,
        entry: &CloudInvitation,
        dispatcher: &Dispatcher<CloudInvitation>,
    ) -> Result<Deletion> {
        let client = Arc::clone(&self.client);
        let dispatcher = dispatcher.clone();
        let id = entry.id.clone();
        tokio::spawn(
            async move {
                match client.decline(&id).await {
                    Ok(()) => {
                        debug!("cloud invitation declined");
                        dispatcher.remove_entry(id);
                    }
                    Err(e) => {
                        warn!(error = %e, "cloud invitation decline failed");
                        dispatcher.action_failed("delete", e);
                    }
                }
            }
            .instrument(tracing::debug_span!("cloud_decline", id = %entry.id)),
        );
        Ok(Deletion::Pending)
    }
}
