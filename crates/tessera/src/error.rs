//! Error types for Tessera.

use tessera_core::CoreError;
use tessera_store::StoreError;
use thiserror::Error;

/// Stable numeric codes for the conditions callers are expected to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// The environment does not support the storage medium.
    StorageNotAvailable = 300100,
    /// The storage was used before it was initialized.
    StorageNotInitialized = 300110,
    /// Binary data could not be encoded or decoded.
    DataEncodingFailed = 310400,
    /// The debug accessor needs `debug_mode` and the memory driver.
    DebuggingModeRequired = 330000,
}

/// Errors that can occur during Tessera operations.
#[derive(Debug, Error)]
pub enum TesseraError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Value could not be encrypted or laid out.
    #[error("encoding error: {0}")]
    Core(#[from] CoreError),

    /// Binary payload could not be encoded or decoded.
    #[error("failed to encode or decode binary data: {0}")]
    DataEncodingFailed(String),

    /// Debug accessor used outside debug mode or without the memory driver.
    #[error("debugging mode is required: enable debug_mode and use the memory driver")]
    DebuggingModeRequired,
}

impl TesseraError {
    /// Numeric code of this error, if it has one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            TesseraError::Store(StoreError::StorageNotAvailable) => {
                Some(ErrorCode::StorageNotAvailable)
            }
            TesseraError::Store(StoreError::StorageNotInitialized) => {
                Some(ErrorCode::StorageNotInitialized)
            }
            TesseraError::DataEncodingFailed(_) => Some(ErrorCode::DataEncodingFailed),
            TesseraError::DebuggingModeRequired => Some(ErrorCode::DebuggingModeRequired),
            _ => None,
        }
    }
}

/// Result type for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;
