//! Error types for lobby-discovery.
//!
//! Cancellation is not an error: a canceled fetch is suppressed, not
//! failed. Duplicate entries are likewise reported through return values.

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport behind a source (socket, provider API, browser) could
    /// not be reached. Surfaced once per failed fetch attempt.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A single record could not be decoded. The record is skipped.
    #[error("failed to decode record: {0}")]
    Decode(#[from] postcard::Error),

    /// A provider client rejected a request.
    #[error("provider error: {0}")]
    Provider(String),

    /// The requested entry is no longer present in the collection.
    #[error("entry not found")]
    NotFound,

    /// Nothing is selected.
    #[error("no entry selected")]
    NoSelection,

    /// The source does not support this action.
    #[error("{0} is not supported by this source")]
    Unsupported(&'static str),

    /// The session has been detached from its source.
    #[error("session detached")]
    Detached,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::TransportUnavailable(msg.into())
    }

    /// Create a provider error.
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        Self::Provider(msg.into())
    }

    /// True for the single-record decode failures that a fetch skips over.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
