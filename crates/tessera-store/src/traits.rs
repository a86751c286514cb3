//! Driver trait: the abstract interface over a physical key-value medium.
//!
//! Drivers know nothing about shards or encryption. They store opaque JSON
//! values under raw keys and report how large a single value may be.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One physical record as seen by a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    /// Raw key, unique within a store.
    pub key: String,
    /// Opaque record body.
    pub value: Value,
}

impl RawItem {
    /// Create a new raw item.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Which driver variant sits behind a `dyn Driver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// In-process map.
    Memory,
    /// Session-based medium with connection lifecycle handling.
    Session,
}

/// The Driver trait: async interface for raw record persistence.
///
/// # Design Notes
///
/// - **Batch calls**: `set_raw` and `remove_raw` take whole batches. A failure
///   of any item fails the call; there is no partial-success report.
/// - **Opaque values**: the driver never inspects `RawItem::value`.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Variant discriminant.
    fn kind(&self) -> DriverKind;

    /// Largest payload (in chars) a single record should carry on this medium.
    fn max_raw_size(&self) -> usize;

    /// Prepare the medium. Fails with `StorageNotAvailable` when unsupported.
    async fn init(&self) -> Result<()>;

    /// Remove every record of the store.
    async fn clear(&self) -> Result<()>;

    /// List every raw key. No ordering is guaranteed.
    async fn all_raw_keys(&self) -> Result<Vec<String>>;

    /// Read the value stored under `key`.
    async fn get_raw(&self, key: &str) -> Result<Option<Value>>;

    /// Write a batch of records.
    async fn set_raw(&self, items: Vec<RawItem>) -> Result<()>;

    /// Delete a batch of records. Missing keys are not an error.
    async fn remove_raw(&self, keys: Vec<String>) -> Result<()>;
}
