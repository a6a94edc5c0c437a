//! Cancelable discovery of multiplayer sessions.
//!
//! A [`DiscoverySession`] drives one [`DiscoverySource`] (social or cloud
//! invitations, LAN broadcast hosts, peer-service hosts, lobby rooms) and
//! guarantees that only the latest fetch ever touches its collection.

#![deny(missing_docs)]

pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod operation;
pub mod session;
pub mod settings;
pub mod sources;
pub mod unique_set;

// Re-export key types
pub use config::DiscoveryConfig;
pub use debounce::DebounceScheduler;
pub use dispatch::{Completion, Dispatcher, SelectionReporter, Updater};
pub use error::{Error, Result};
pub use operation::{CancelableOperation, CancelableQuery, OperationHandle, OperationState};
pub use session::{DiscoverySession, SessionObserver, SessionState};
pub use settings::{LastHost, MemorySettings, SettingsStore};
pub use sources::{ClearPolicy, Deletion, DiscoverySource};
pub use unique_set::{Keyed, UniqueIndexedSet};
