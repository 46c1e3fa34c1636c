// Error taxonomy shared across the platform

use thiserror::Error;

/// Result type alias for scribe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by storage, upload, and controller operations.
///
/// The api crate maps these onto HTTP statuses; the worker maps `Storage`
/// onto its transient retry class. Handler-declared permanent failures use
/// the sentinel in `scribe-durable` instead and never reach callers
/// directly.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input: oversize upload, unknown category, incomplete completion
    #[error("validation error: {0}")]
    Validation(String),

    /// Owner mismatch on a gated resource
    #[error("permission denied: {0}")]
    Authorization(String),

    /// Unknown id
    #[error("not found: {0}")]
    NotFound(String),

    /// State disagreement the client can resolve by re-reading (tus offset
    /// mismatch)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient infrastructure failure (datastore busy, disk, network)
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create an authorization error
    pub fn authorization(msg: impl Into<String>) -> Self {
        Error::Authorization(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }
}
