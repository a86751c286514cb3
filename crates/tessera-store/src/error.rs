//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during driver operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage medium is unsupported or unreachable in this environment.
    #[error("storage not available")]
    StorageNotAvailable,

    /// An operation reached a driver that was never opened and is not reopening.
    #[error("storage is not initialized")]
    StorageNotInitialized,

    /// A write was attempted through a read-only object store handle.
    #[error("object store handle is read-only")]
    ReadOnly,

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The medium rejected a request (closed session, unknown container, ...).
    #[error("medium error: {0}")]
    Medium(String),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
