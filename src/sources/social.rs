//! Invitations from a social-network provider.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn, Instrument};

use crate::config::DiscoveryConfig;
use crate::dispatch::{Completion, Dispatcher};
use crate::error::Result;
use crate::operation::OperationHandle;
use crate::unique_set::Keyed;

use super::DiscoverySource;

/// An invitation to join a friend's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialInvitation {
    /// Provider invitation id.
    pub id: String,
    /// Display name of the inviting user.
    pub from: String,
    /// Provider session the invitation points to.
    pub session: String,
}

impl Keyed for SocialInvitation {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Provider client for social invitations.
#[async_trait]
pub trait SocialClient: Send + Sync + 'static {
    /// Fetch at most `limit` pending invitations, in provider order.
    async fn invitations(&self, limit: usize) -> Result<Vec<SocialInvitation>>;

    /// Join the session behind an invitation.
    async fn join(&self, invitation: &SocialInvitation) -> Result<()>;
}

/// One-shot source over a [`SocialClient`].
pub struct SocialInvitationSource<C> {
    client: Arc<C>,
    limit: usize,
}

impl<C: SocialClient> SocialInvitationSource<C> {
    /// Create a source with the default limit.
    pub fn new(client: C) -> Self {
        Self::with_config(client, &DiscoveryConfig::default())
    }

    /// Create a source from shared options.
    pub fn with_config(client: C, config: &DiscoveryConfig) -> Self {
        Self {
            client: Arc::new(client),
            limit: config.social_limit,
        }
    }

    /// Set the invitation limit. Default: 25.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = n;
        self
    }
}

impl<C: SocialClient> DiscoverySource for SocialInvitationSource<C> {
    type Entry = SocialInvitation;

    fn name(&self) -> &'static str {
        "social"
    }

    fn fetch(&mut self, completion: Completion<SocialInvitation>) -> OperationHandle {
        let handle = completion.handle();
        let client = Arc::clone(&self.client);
        let limit = self.limit;
        let span = tracing::debug_span!("social_fetch", limit);

        let task = tokio::spawn(
            async move {
                match client.invitations(limit).await {
                    Ok(mut invitations) => {
                        invitations.truncate(limit);
                        debug!(count = invitations.len(), "social invitations received");
                        let changed = !invitations.is_empty();
                        completion.updater().replace_all(invitations);
                        completion.complete(changed);
                    }
                    Err(e) => completion.fail(e),
                }
            }
            .instrument(span),
        );
        handle.abort_on_cancel(task);
        handle
    }

    fn accept(
        &mut self,
        entry: &SocialInvitation,
        dispatcher: &Dispatcher<SocialInvitation>,
    ) -> Result<()> {
        let client = Arc::clone(&self.client);
        let invitation = entry.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(
            async move {
                if let Err(e) = client.join(&invitation).await {
                    warn!(error = %e, "failed to join social session");
                    dispatcher.action_failed("accept", e);
                }
            }
            .instrument(tracing::debug_span!("social_join", id = %entry.id)),
        );
        Ok(())
    }
}
