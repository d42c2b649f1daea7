//! Error types for the synchronization layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Sync Error Enum ==
/// Unified error type for the synchronization layer.
///
/// Errors are `Clone` because a single in-flight fetch result is handed to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Fetch or stream transport failure (recoverable)
    #[error("Network error: {0}")]
    Network(String),

    /// Missing or rejected credential, terminal until the credential changes
    #[error("Not authorized")]
    NotAuthorized,

    /// A payload or stream frame could not be decoded
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Domain name not known to the registry
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    /// Internal failure (task panicked, channel closed)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Returns true if retrying later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::MalformedPayload(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedPayload(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the synchronization layer.
pub type Result<T> = std::result::Result<T, SyncError>;
