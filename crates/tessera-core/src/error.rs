//! Error types for Tessera Core.

use thiserror::Error;

/// Errors raised while encoding or decoding stored values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("malformed shard record: {0}")]
    MalformedShard(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
