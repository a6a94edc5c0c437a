//! Hosts answering a local-network broadcast query.
//!
//! Every fetch broadcasts a query tagged with a fresh request id. Replies are
//! collected by a listener that stays up across fetches, so late replies to
//! an earlier round still update the list. Entries are keyed by
//! `address:port` and are never pruned; only a reset clears them.

pub mod wire;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::{debug, trace, warn, Instrument};

use crate::config::DiscoveryConfig;
use crate::dispatch::{Completion, Dispatcher, Updater};
use crate::error::Result;
use crate::operation::OperationHandle;
use crate::settings::{LastHost, SettingsStore};
use crate::unique_set::Keyed;

use super::continuous::{Listener, ListenerShared};
use super::{ClearPolicy, DiscoverySource};

use self::wire::{DiscoveryQuery, HostAnnouncement};

/// Local-network send/receive primitive.
#[async_trait]
pub trait BroadcastChannel: Send + Sync + 'static {
    /// Broadcast `payload` to `port` on the local network.
    async fn broadcast(&self, port: u16, payload: Vec<u8>) -> Result<()>;

    /// Datagrams received on the channel. An error ends the stream.
    fn listen(&self) -> BoxStream<'static, Result<(SocketAddr, Vec<u8>)>>;
}

/// A host found on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanHost {
    /// Address the reply came from.
    pub address: IpAddr,
    /// Port the host accepts players on.
    pub port: u16,
    /// Host display name.
    pub name: String,
    /// What is being played.
    pub content: String,
    /// Players connected.
    pub players: u8,
    /// Player capacity.
    pub max_players: u8,
    /// Whether joining needs a password.
    pub has_password: bool,
    /// Round of the most recent reply.
    pub request_id: u32,
}

impl LanHost {
    fn from_announcement(from: SocketAddr, announcement: HostAnnouncement) -> Self {
        Self {
            address: from.ip(),
            port: announcement.port,
            name: announcement.host_name,
            content: announcement.content,
            players: announcement.players,
            max_players: announcement.max_players,
            has_password: announcement.has_password,
            request_id: announcement.request_id,
        }
    }

    /// `address:port` of the host.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl Keyed for LanHost {
    type Key = SocketAddr;

    fn key(&self) -> SocketAddr {
        self.socket_addr()
    }
}

/// Continuous source over a [`BroadcastChannel`].
pub struct LanBroadcastSource<C> {
    channel: Arc<C>,
    port: u16,
    response_window: Duration,
    last_request: Arc<AtomicU32>,
    listener: Listener,
    settings: Option<Arc<dyn SettingsStore>>,
}

impl<C: BroadcastChannel> LanBroadcastSource<C> {
    /// Create a source with default options.
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, &DiscoveryConfig::default())
    }

    /// Create a source from shared options.
    pub fn with_config(channel: C, config: &DiscoveryConfig) -> Self {
        Self {
            channel: Arc::new(channel),
            port: config.lan_port,
            response_window: config.lan_response_window,
            last_request: Arc::new(AtomicU32::new(0)),
            listener: Listener::default(),
            settings: None,
        }
    }

    /// Set the reply window. Default: 1s.
    pub fn response_window(mut self, d: Duration) -> Self {
        self.response_window = d;
        self
    }

    /// Remember accepted hosts in `store`.
    pub fn remember_hosts(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    /// Id of the most recent query, 0 before the first fetch.
    pub fn last_request_id(&self) -> u32 {
        self.last_request.load(Ordering::Acquire)
    }

    /// True while the reply listener is running.
    pub fn is_listening(&self) -> bool {
        self.listener.is_running()
    }
}

async fn listen(
    mut datagrams: BoxStream<'static, Result<(SocketAddr, Vec<u8>)>>,
    updater: Updater<LanHost>,
    shared: Arc<ListenerShared>,
    last_request: Arc<AtomicU32>,
) {
    while let Some(next) = datagrams.next().await {
        let (from, bytes) = match next {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(error = %e, "lan listener failed");
                shared.fail(e);
                return;
            }
        };
        let announcement = match HostAnnouncement::decode(&bytes) {
            Ok(a) => a,
            Err(e) => {
                warn!(%from, error = %e, "skipping malformed lan reply");
                continue;
            }
        };
        let issued = last_request.load(Ordering::Acquire);
        if announcement.request_id == 0 || announcement.request_id > issued {
            trace!(%from, request_id = announcement.request_id, "ignoring reply to foreign query");
            continue;
        }
        let host = LanHost::from_announcement(from, announcement);
        debug!(host = %host.socket_addr(), request_id = host.request_id, "lan host replied");
        if !updater.upsert(host) {
            return;
        }
        shared.arrived();
    }
    debug!("lan datagram stream ended");
}

impl<C: BroadcastChannel> DiscoverySource for LanBroadcastSource<C> {
    type Entry = LanHost;

    fn name(&self) -> &'static str {
        "lan"
    }

    fn clear_policy(&self) -> ClearPolicy {
        ClearPolicy::Retain
    }

    fn fetch(&mut self, completion: Completion<LanHost>) -> OperationHandle {
        let channel = Arc::clone(&self.channel);
        let last_request = Arc::clone(&self.last_request);
        let dispatcher = completion.dispatcher().clone();
        self.listener.ensure_running("lan", |guard, shared| {
            listen(channel.listen(), dispatcher.updater(guard), shared, last_request)
        });

        let handle = completion.handle();
        let shared = self.listener.shared();
        let before = shared.arrivals();
        let request_id = self.last_request.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        let channel = Arc::clone(&self.channel);
        let port = self.port;
        let window = self.response_window;

        let task = tokio::spawn(
            async move {
                let sent = match DiscoveryQuery::new(request_id).encode() {
                    Ok(payload) => channel.broadcast(port, payload).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    completion.fail(e);
                    return;
                }
                trace!("lan query sent");
                shared.settle(completion, window, before).await;
            }
            .instrument(tracing::debug_span!("lan_fetch", request_id, port)),
        );
        handle.abort_on_cancel(task);
        handle
    }

    fn reset(&mut self) {
        self.listener.stop();
    }

    fn accept(&mut self, entry: &LanHost, _dispatcher: &Dispatcher<LanHost>) -> Result<()> {
        if let Some(store) = &self.settings {
            LastHost::from_addr(entry.address, entry.port).save(store.as_ref());
        }
        Ok(())
    }
}
