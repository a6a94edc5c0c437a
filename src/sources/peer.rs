//! Hosts advertised through a peer-service discovery primitive.
//!
//! Discovery happens in two phases that may arrive in either order: a
//! service record with the host's metadata, and a presence record resolving
//! the peer to an address. A host is only listed once both are known for
//! the same peer id. Service records still waiting for presence are kept
//! until the source is reset.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::{debug, trace, warn, Instrument};

use crate::config::DiscoveryConfig;
use crate::dispatch::{Completion, Dispatcher, Updater};
use crate::error::{Error, Result};
use crate::operation::OperationHandle;
use crate::settings::{LastHost, SettingsStore};
use crate::unique_set::Keyed;

use super::continuous::{Listener, ListenerShared};
use super::{ClearPolicy, DiscoverySource};

/// One record from the peer browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRecord {
    /// Phase 1: what the peer offers.
    Service {
        /// Peer identifier.
        peer_id: String,
        /// Host display name.
        name: String,
        /// Port the host accepts players on.
        port: u16,
        /// What is being played.
        content: String,
    },
    /// Phase 2: the peer is present and reachable at `address`.
    Presence {
        /// Peer identifier.
        peer_id: String,
        /// Resolved address.
        address: IpAddr,
    },
}

impl PeerRecord {
    /// The peer this record describes.
    pub fn peer_id(&self) -> &str {
        match self {
            PeerRecord::Service { peer_id, .. } | PeerRecord::Presence { peer_id, .. } => peer_id,
        }
    }
}

/// Peer-service discovery primitive.
pub trait PeerBrowser: Send + Sync + 'static {
    /// Start browsing. Decode errors are per record; a transport error ends
    /// the stream.
    fn browse(&self) -> BoxStream<'static, Result<PeerRecord>>;
}

/// A fully resolved peer host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHost {
    /// Peer identifier.
    pub peer_id: String,
    /// Resolved address.
    pub address: IpAddr,
    /// Port the host accepts players on.
    pub port: u16,
    /// Host display name.
    pub name: String,
    /// What is being played.
    pub content: String,
}

impl Keyed for PeerHost {
    type Key = (String, u16);

    fn key(&self) -> (String, u16) {
        (self.peer_id.clone(), self.port)
    }
}

#[derive(Debug, Clone)]
struct ServiceInfo {
    name: String,
    port: u16,
    content: String,
}

/// Joins phase-1 and phase-2 records by peer id.
#[derive(Debug, Default)]
pub(crate) struct Correlator {
    services: HashMap<String, ServiceInfo>,
    presence: HashMap<String, IpAddr>,
}

impl Correlator {
    /// Ingest a record; returns the host if both phases are now known.
    pub(crate) fn ingest(&mut self, record: PeerRecord) -> Option<PeerHost> {
        let peer_id = match record {
            PeerRecord::Service {
                peer_id,
                name,
                port,
                content,
            } => {
                self.services
                    .insert(peer_id.clone(), ServiceInfo { name, port, content });
                peer_id
            }
            PeerRecord::Presence { peer_id, address } => {
                self.presence.insert(peer_id.clone(), address);
                peer_id
            }
        };
        let service = self.services.get(&peer_id)?;
        let address = *self.presence.get(&peer_id)?;
        Some(PeerHost {
            address,
            port: service.port,
            name: service.name.clone(),
            content: service.content.clone(),
            peer_id,
        })
    }

    /// Service records still waiting for presence.
    pub(crate) fn pending(&self) -> usize {
        self.services
            .keys()
            .filter(|id| !self.presence.contains_key(*id))
            .count()
    }
}

/// Continuous source over a [`PeerBrowser`].
pub struct PeerServiceDiscoverySource<B> {
    browser: Arc<B>,
    settle_window: Duration,
    listener: Listener,
    settings: Option<Arc<dyn SettingsStore>>,
}

impl<B: PeerBrowser> PeerServiceDiscoverySource<B> {
    /// Create a source with default options.
    pub fn new(browser: B) -> Self {
        Self::with_config(browser, &DiscoveryConfig::default())
    }

    /// Create a source from shared options.
    pub fn with_config(browser: B, config: &DiscoveryConfig) -> Self {
        Self {
            browser: Arc::new(browser),
            settle_window: config.peer_settle_window,
            listener: Listener::default(),
            settings: None,
        }
    }

    /// Set the settle window. Default: 1s.
    pub fn settle_window(mut self, d: Duration) -> Self {
        self.settle_window = d;
        self
    }

    /// Remember accepted hosts in `store`.
    pub fn remember_hosts(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    /// True while the browser is running.
    pub fn is_browsing(&self) -> bool {
        self.listener.is_running()
    }
}

async fn browse(
    mut records: BoxStream<'static, Result<PeerRecord>>,
    updater: Updater<PeerHost>,
    shared: Arc<ListenerShared>,
) {
    let mut correlator = Correlator::default();
    while let Some(next) = records.next().await {
        let record = match next {
            Ok(record) => record,
            Err(e) if e.is_partial() => {
                warn!(error = %e, "skipping malformed peer record");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "peer browser failed");
                shared.fail(match e {
                    Error::TransportUnavailable(_) => e,
                    other => Error::transport(other.to_string()),
                });
                return;
            }
        };
        trace!(peer = record.peer_id(), "peer record");
        let Some(host) = correlator.ingest(record) else {
            trace!(pending = correlator.pending(), "peer awaiting second phase");
            continue;
        };
        debug!(peer = %host.peer_id, address = %host.address, port = host.port, "peer host resolved");
        if !updater.upsert(host) {
            return;
        }
        shared.arrived();
    }
    debug!("peer record stream ended");
}

impl<B: PeerBrowser> DiscoverySource for PeerServiceDiscoverySource<B> {
    type Entry = PeerHost;

    fn name(&self) -> &'static str {
        "peer"
    }

    fn clear_policy(&self) -> ClearPolicy {
        ClearPolicy::Retain
    }

    fn fetch(&mut self, completion: Completion<PeerHost>) -> OperationHandle {
        let browser = Arc::clone(&self.browser);
        let dispatcher = completion.dispatcher().clone();
        self.listener.ensure_running("peer", |guard, shared| {
            browse(browser.browse(), dispatcher.updater(guard), shared)
        });

        let handle = completion.handle();
        let shared = self.listener.shared();
        let before = shared.arrivals();
        let window = self.settle_window;
        let task = tokio::spawn(
            async move { shared.settle(completion, window, before).await }
                .instrument(tracing::debug_span!("peer_fetch")),
        );
        handle.abort_on_cancel(task);
        handle
    }

    fn reset(&mut self) {
        self.listener.stop();
    }

    fn accept(&mut self, entry: &PeerHost, _dispatcher: &Dispatcher<PeerHost>) -> Result<()> {
        if let Some(store) = &self.settings {
            LastHost::from_addr(entry.address, entry.port).save(store.as_ref());
        }
        Ok(())
    }
}
