//! In-memory implementation of the Driver trait.
//!
//! Records live in a [`MemoryRegistry`] that the caller owns. Two drivers
//! created from the same registry with the same store name address the same
//! records; a driver built with [`MemoryDriver::new`] gets a private registry.
//! Reads and writes sleep for a configurable delay so callers observe the
//! same asynchronous behaviour as a real medium.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::traits::{Driver, DriverKind, RawItem};

/// Per-record ceiling for the memory driver (10 MiB).
pub const MEMORY_ITEM_SIZE_LIMIT: usize = 10 * 1024 * 1024;

/// Default artificial read latency.
pub const DEFAULT_MEMORY_READ_DELAY: Duration = Duration::ZERO;

/// Default artificial write latency.
pub const DEFAULT_MEMORY_WRITE_DELAY: Duration = Duration::from_millis(1);

type Records = BTreeMap<String, Value>;

/// Configuration for the memory driver.
#[derive(Debug, Clone)]
pub struct MemoryDriverConfig {
    /// Delay applied before every read.
    pub read_delay: Duration,
    /// Delay applied before every write.
    pub write_delay: Duration,
}

impl Default for MemoryDriverConfig {
    fn default() -> Self {
        Self {
            read_delay: DEFAULT_MEMORY_READ_DELAY,
            write_delay: DEFAULT_MEMORY_WRITE_DELAY,
        }
    }
}

/// Process-scoped map from store name to its records.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    stores: Mutex<HashMap<String, Arc<RwLock<Records>>>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Names of every store registered so far.
    pub fn names(&self) -> Vec<String> {
        let stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }

    fn store(&self, name: &str) -> Arc<RwLock<Records>> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        stores.entry(name.to_string()).or_default().clone()
    }
}

/// In-memory driver.
pub struct MemoryDriver {
    name: String,
    records: Arc<RwLock<Records>>,
    config: MemoryDriverConfig,
}

impl MemoryDriver {
    /// Create a driver backed by a private registry.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_registry(name, &MemoryRegistry::new(), MemoryDriverConfig::default())
    }

    /// Create a driver whose records live in `registry` under `name`.
    pub fn with_registry(
        name: impl Into<String>,
        registry: &Arc<MemoryRegistry>,
        config: MemoryDriverConfig,
    ) -> Self {
        let name = name.into();
        let records = registry.store(&name);
        Self {
            name,
            records,
            config,
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of every raw record, for debugging.
    pub fn raw_data(&self) -> BTreeMap<String, Value> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Records> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Records> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Memory
    }

    fn max_raw_size(&self) -> usize {
        MEMORY_ITEM_SIZE_LIMIT
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        pause(self.config.write_delay).await;
        self.write().clear();
        Ok(())
    }

    async fn all_raw_keys(&self) -> Result<Vec<String>> {
        pause(self.config.read_delay).await;
        Ok(self.read().keys().cloned().collect())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Value>> {
        pause(self.config.read_delay).await;
        Ok(self.read().get(key).cloned())
    }

    async fn set_raw(&self, items: Vec<RawItem>) -> Result<()> {
        pause(self.config.write_delay).await;
        let mut records = self.write();
        for item in items {
            records.insert(item.key, item.value);
        }
        Ok(())
    }

    async fn remove_raw(&self, keys: Vec<String>) -> Result<()> {
        pause(self.config.write_delay).await;
        let mut records = self.write();
        for key in &keys {
            records.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_driver_basic() {
        let driver = MemoryDriver::new("basic");
        driver.init().await.unwrap();

        driver
            .set_raw(vec![
                RawItem::new("a.0", json!({ "data": "1" })),
                RawItem::new("b.0", json!({ "data": "2" })),
            ])
            .await
            .unwrap();

        assert_eq!(
            driver.get_raw("a.0").await.unwrap(),
            Some(json!({ "data": "1" }))
        );
        assert_eq!(driver.get_raw("missing").await.unwrap(), None);

        let mut keys = driver.all_raw_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a.0", "b.0"]);
    }

    #[tokio::test]
    async fn test_memory_driver_remove_and_clear() {
        let driver = MemoryDriver::new("remove");
        driver
            .set_raw(vec![
                RawItem::new("a.0", json!(1)),
                RawItem::new("b.0", json!(2)),
                RawItem::new("c.0", json!(3)),
            ])
            .await
            .unwrap();

        driver
            .remove_raw(vec!["a.0".into(), "never-written".into()])
            .await
            .unwrap();
        assert_eq!(driver.raw_data().len(), 2);

        driver.clear().await.unwrap();
        assert!(driver.raw_data().is_empty());
    }

    #[tokio::test]
    async fn test_shared_registry_addresses_same_records() {
        let registry = MemoryRegistry::new();
        let first = MemoryDriver::with_registry("shared", &registry, MemoryDriverConfig::default());
        let second =
            MemoryDriver::with_registry("shared", &registry, MemoryDriverConfig::default());
        let other = MemoryDriver::with_registry("other", &registry, MemoryDriverConfig::default());

        first
            .set_raw(vec![RawItem::new("k.0", json!("v"))])
            .await
            .unwrap();
        second.init().await.unwrap();

        assert_eq!(second.get_raw("k.0").await.unwrap(), Some(json!("v")));
        assert_eq!(other.get_raw("k.0").await.unwrap(), None);
        assert_eq!(registry.names(), vec!["other", "shared"]);
    }

    #[tokio::test]
    async fn test_private_registries_are_isolated() {
        let a = MemoryDriver::new("same-name");
        let b = MemoryDriver::new("same-name");

        a.set_raw(vec![RawItem::new("k.0", json!(1))]).await.unwrap();
        assert_eq!(b.get_raw("k.0").await.unwrap(), None);
    }
}
