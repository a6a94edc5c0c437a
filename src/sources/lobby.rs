//! Rooms from a remote lobby server, read page by page.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn, Instrument};

use crate::config::DiscoveryConfig;
use crate::dispatch::{Completion, Dispatcher};
use crate::error::Result;
use crate::operation::OperationHandle;
use crate::settings::{LastHost, SettingsStore};
use crate::unique_set::Keyed;

use super::DiscoverySource;

/// A room listed by the lobby server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyRoom {
    /// Server-assigned room id.
    pub id: u64,
    /// Room display name.
    pub name: String,
    /// Host address as published by the server.
    pub host: String,
    /// Port the host accepts players on.
    pub port: u16,
    /// What is being played.
    pub content: String,
    /// Players connected.
    pub players: u8,
    /// Whether joining needs a password.
    pub has_password: bool,
}

impl Keyed for LobbyRoom {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }
}

/// One page of a lobby listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyPage {
    /// Rooms on this page.
    pub rooms: Vec<LobbyRoom>,
    /// Next page to request, if any.
    pub next_page: Option<u32>,
}

/// HTTP client for the lobby server.
#[async_trait]
pub trait LobbyClient: Send + Sync + 'static {
    /// Fetch one page of the listing. Page numbers start at 0.
    async fn page(&self, page: u32) -> Result<LobbyPage>;
}

/// One-shot paged source over a [`LobbyClient`].
pub struct LobbyListingSource<C> {
    client: Arc<C>,
    max_pages: u32,
    settings: Option<Arc<dyn SettingsStore>>,
}

impl<C: LobbyClient> LobbyListingSource<C> {
    /// Create a source with default options.
    pub fn new(client: C) -> Self {
        Self::with_config(client, &DiscoveryConfig::default())
    }

    /// Create a source from shared options.
    pub fn with_config(client: C, config: &DiscoveryConfig) -> Self {
        Self {
            client: Arc::new(client),
            max_pages: config.lobby_max_pages,
            settings: None,
        }
    }

    /// Set the page cap. Default: 8.
    pub fn max_pages(mut self, n: u32) -> Self {
        self.max_pages = n;
        self
    }

    /// Remember accepted hosts in `store`.
    pub fn remember_hosts(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }
}

async fn read_pages<C: LobbyClient>(client: &C, max_pages: u32) -> Result<Vec<LobbyRoom>> {
    let mut rooms = Vec::new();
    let mut next = Some(0);
    let mut read = 0;
    while let Some(page) = next {
        if read == max_pages {
            debug!(max_pages, "lobby page cap reached");
            break;
        }
        match client.page(page).await {
            Ok(listing) => {
                rooms.extend(listing.rooms);
                next = listing.next_page;
            }
            Err(e) if read == 0 => return Err(e),
            Err(e) => {
                warn!(page, error = %e, "lobby page failed, keeping earlier pages");
                break;
            }
        }
        read += 1;
    }
    Ok(rooms)
}

impl<C: LobbyClient> DiscoverySource for LobbyListingSource<C> {
    type Entry = LobbyRoom;

    fn name(&self) -> &'static str {
        "lobby"
    }

    fn fetch(&mut self, completion: Completion<LobbyRoom>) -> OperationHandle {
        let handle = completion.handle();
        let client = Arc::clone(&self.client);
        let max_pages = self.max_pages;

        let task = tokio::spawn(
            async move {
                match read_pages(client.as_ref(), max_pages).await {
                    Ok(rooms) => {
                        debug!(count = rooms.len(), "lobby rooms received");
                        let changed = !rooms.is_empty();
                        completion.updater().replace_all(rooms);
                        completion.complete(changed);
                    }
                    Err(e) => completion.fail(e),
                }
            }
            .instrument(tracing::debug_span!("lobby_fetch", max_pages)),
        );
        handle.abort_on_cancel(task);
        handle
    }

    fn accept(&mut self, entry: &LobbyRoom, _dispatcher: &Dispatcher<LobbyRoom>) -> Result<()> {
        if let Some(store) = &self.settings {
            LastHost {
                host: entry.host.clone(),
                port: entry.port,
            }
            .save(store.as_ref());
        }
        Ok(())
    }
}
