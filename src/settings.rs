//! Key/value settings used to remember the last host the user joined.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;

const LAST_HOST: &str = "netplay.last_host";
const LAST_PORT: &str = "netplay.last_port";

/// Key/value settings store provided by the host application.
pub trait SettingsStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    fn set(&self, key: &str, value: String);
}

/// In-memory store. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySettings {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values.lock().insert(key.to_owned(), value);
    }
}

/// Last host and port the user connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastHost {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl LastHost {
    /// Build from an address.
    pub fn from_addr(addr: IpAddr, port: u16) -> Self {
        Self {
            host: addr.to_string(),
            port,
        }
    }

    /// Load from `store`. Missing or malformed values yield `None`.
    pub fn load(store: &dyn SettingsStore) -> Option<Self> {
        let host = store.get(LAST_HOST)?;
        let port = store.get(LAST_PORT)?.parse().ok()?;
        Some(Self { host, port })
    }

    /// Save to `store`.
    pub fn save(&self, store: &dyn SettingsStore) {
        store.set(LAST_HOST, self.host.clone());
        store.set(LAST_PORT, self.port.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_host_round_trips_through_store() {
        let store = MemorySettings::new();
        assert_eq!(LastHost::load(&store), None);

        let host = LastHost::from_addr("192.168.1.20".parse().unwrap(), 55435);
        host.save(&store);
        assert_eq!(LastHost::load(&store), Some(host));
    }

    #[test]
    fn malformed_port_is_ignored() {
        let store = MemorySettings::new();
        store.set(LAST_HOST, "example".into());
        store.set(LAST_PORT, "not-a-port".into());
        assert_eq!(LastHost::load(&store), None);
    }
}
