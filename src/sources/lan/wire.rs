//! Datagrams exchanged during LAN discovery.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tag at the start of every discovery datagram.
pub const MAGIC: [u8; 4] = *b"LBYD";

/// Wire protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Broadcast by a client looking for hosts.
///
/// Serialized with postcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    /// Always [`MAGIC`].
    pub magic: [u8; 4],
    /// Always [`PROTOCOL_VERSION`].
    pub version: u16,
    /// Round this query belongs to. Hosts echo it back.
    pub request_id: u32,
}

impl DiscoveryQuery {
    /// Create a query for `request_id`.
    pub fn new(request_id: u32) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            request_id,
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Parse a query as seen by a host.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let query: Self = postcard::from_bytes(bytes)?;
        if query.magic != MAGIC || query.version != PROTOCOL_VERSION {
            return Err(Error::Decode(postcard::Error::DeserializeBadEncoding));
        }
        Ok(query)
    }
}

/// A host's reply to a [`DiscoveryQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAnnouncement {
    /// Always [`MAGIC`].
    pub magic: [u8; 4],
    /// Always [`PROTOCOL_VERSION`].
    pub version: u16,
    /// Echo of the query's request id.
    pub request_id: u32,
    /// Port the host accepts players on.
    pub port: u16,
    /// Host display name.
    pub host_name: String,
    /// What is being played.
    pub content: String,
    /// Players connected.
    pub players: u8,
    /// Player capacity.
    pub max_players: u8,
    /// Whether joining needs a password.
    pub has_password: bool,
}

impl HostAnnouncement {
    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Parse a datagram, rejecting foreign or incompatible payloads.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let announcement: Self = postcard::from_bytes(bytes)?;
        if announcement.magic != MAGIC || announcement.version != PROTOCOL_VERSION {
            return Err(Error::Decode(postcard::Error::DeserializeBadEncoding));
        }
        Ok(announcement)
    }
}
