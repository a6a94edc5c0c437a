//! Tunables shared by the built-in sources.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default UDP port LAN hosts listen on for discovery queries.
pub const DEFAULT_LAN_PORT: u16 = 55435;

/// Options for the built-in discovery sources.
///
/// Deserializable with every field optional, so a host application can embed
/// it in its own settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum invitations requested from the social provider.
    pub social_limit: usize,
    /// Quiet window before a burst of push notifications triggers a refresh.
    #[serde(with = "millis")]
    pub push_debounce: Duration,
    /// Port LAN discovery queries are broadcast to.
    pub lan_port: u16,
    /// How long a LAN fetch waits for replies before completing.
    #[serde(with = "millis")]
    pub lan_response_window: Duration,
    /// How long a peer-service fetch waits for records before completing.
    #[serde(with = "millis")]
    pub peer_settle_window: Duration,
    /// Maximum pages read from a lobby listing.
    pub lobby_max_pages: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            social_limit: 25,
            push_debounce: Duration::from_secs(10),
            lan_port: DEFAULT_LAN_PORT,
            lan_response_window: Duration::from_secs(1),
            peer_settle_window: Duration::from_secs(1),
            lobby_max_pages: 8,
        }
    }
}

impl DiscoveryConfig {
    /// Set the social invitation limit. Default: 25.
    pub fn social_limit(mut self, n: usize) -> Self {
        self.social_limit = n;
        self
    }

    /// Set the push debounce window. Default: 10s.
    pub fn push_debounce(mut self, d: Duration) -> Self {
        self.push_debounce = d;
        self
    }

    /// Set the LAN discovery port.
    pub fn lan_port(mut self, port: u16) -> Self {
        self.lan_port = port;
        self
    }

    /// Set the LAN reply window. Default: 1s.
    pub fn lan_response_window(mut self, d: Duration) -> Self {
        self.lan_response_window = d;
        self
    }

    /// Set the peer-service settle window. Default: 1s.
    pub fn peer_settle_window(mut self, d: Duration) -> Self {
        self.peer_settle_window = d;
        self
    }

    /// Set the lobby page cap. Default: 8.
    pub fn lobby_max_pages(mut self, n: u32) -> Self {
        self.lobby_max_pages = n;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
