//! Error types for the grant engine

use thiserror::Error;

/// Boxed error raised by a [`GrantStore`](crate::store::GrantStore) backend
pub type StoreError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Grant engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Caller passed a name or target the engine cannot interpret
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Persistence collaborator failure, passed through unchanged
    #[error("Store error: {0}")]
    Store(#[source] StoreError),

    /// Snapshot (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Wrap a backend error
    pub fn store(err: impl Into<StoreError>) -> Self {
        Self::Store(err.into())
    }

    /// Check if this is a caller contract violation
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

/// Result type for grant engine operations
pub type Result<T> = std::result::Result<T, AuthzError>;
