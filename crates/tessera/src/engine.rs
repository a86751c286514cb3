//! The sharding engine.
//!
//! Turns logical entries into physical records: values are encrypted into one
//! string, sliced into shards no larger than the driver allows, and written in
//! a single batch. Reads fetch shard 0 to learn the count, then the remaining
//! shards concurrently, and put them back together in index order.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, warn};

use tessera_core::{
    clamp_max_raw_size, encryption_probe, logical_key, raw_key, raw_keys, shardify, CoreError,
    EncryptionPolicy, JsonPolicy, ShardRecord, DEFAULT_MAX_RAW_SIZE,
};
use tessera_store::{Driver, DriverKind, MemoryDriver, RawItem};

use crate::error::Result;

/// Suffix of the reserved marker entry, appended to the store name.
pub const MARKER_SUFFIX: &str = ".encryptcheck";

/// Field of the marker entry holding the probe ciphertext.
const MARKER_FIELD: &str = "encrypted";

/// Engine configuration.
#[derive(Clone)]
pub struct EngineConfig {
    /// Store name. Also names the encryption marker.
    pub name: String,
    /// Shard size override. Raised to the minimum floor when too small.
    pub max_raw_size: Option<usize>,
    /// Value encryption policy.
    pub policy: Arc<dyn EncryptionPolicy>,
}

impl EngineConfig {
    /// Configuration with the JSON policy and the driver's own shard size.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_raw_size: None,
            policy: Arc::new(JsonPolicy),
        }
    }

    /// Replace the encryption policy.
    pub fn with_policy(mut self, policy: Arc<dyn EncryptionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Override the shard size.
    pub fn with_max_raw_size(mut self, max_raw_size: usize) -> Self {
        self.max_raw_size = Some(max_raw_size);
        self
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("name", &self.name)
            .field("max_raw_size", &self.max_raw_size)
            .finish_non_exhaustive()
    }
}

/// The driver an engine runs on, with its variant kept visible.
#[derive(Clone)]
pub enum DriverHandle {
    /// The in-memory driver.
    Memory(Arc<MemoryDriver>),
    /// Any other driver, usually a `SessionDriver`.
    Session(Arc<dyn Driver>),
}

impl DriverHandle {
    /// Wrap a memory driver.
    pub fn memory(driver: MemoryDriver) -> Self {
        DriverHandle::Memory(Arc::new(driver))
    }

    /// Wrap a session-based driver.
    pub fn session(driver: impl Driver + 'static) -> Self {
        DriverHandle::Session(Arc::new(driver))
    }

    /// The driver as a trait object.
    pub fn as_driver(&self) -> Arc<dyn Driver> {
        match self {
            DriverHandle::Memory(driver) => Arc::clone(driver) as Arc<dyn Driver>,
            DriverHandle::Session(driver) => Arc::clone(driver),
        }
    }

    /// The memory driver, if that is the variant.
    pub fn as_memory(&self) -> Option<&Arc<MemoryDriver>> {
        match self {
            DriverHandle::Memory(driver) => Some(driver),
            DriverHandle::Session(_) => None,
        }
    }

    /// Driver variant.
    pub fn kind(&self) -> DriverKind {
        match self {
            DriverHandle::Memory(_) => DriverKind::Memory,
            DriverHandle::Session(driver) => driver.kind(),
        }
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverHandle::Memory(driver) => f.debug_tuple("Memory").field(&driver.name()).finish(),
            DriverHandle::Session(driver) => f.debug_tuple("Session").field(&driver.kind()).finish(),
        }
    }
}

/// Sharding and versioning engine over a [`Driver`].
pub struct Engine {
    name: String,
    marker_key: String,
    max_raw_size: Option<usize>,
    policy: Arc<dyn EncryptionPolicy>,
    handle: RwLock<DriverHandle>,
}

impl Engine {
    /// Create an engine. Nothing touches the driver until [`Engine::init`].
    pub fn new(config: EngineConfig, handle: DriverHandle) -> Self {
        let marker_key = format!("{}{}", config.name, MARKER_SUFFIX);
        Self {
            name: config.name,
            marker_key,
            max_raw_size: config.max_raw_size,
            policy: config.policy,
            handle: RwLock::new(handle),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical key of the reserved encryption marker.
    pub fn marker_key(&self) -> &str {
        &self.marker_key
    }

    /// Current driver handle.
    pub fn handle(&self) -> DriverHandle {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the driver for good. Records on the old driver are not moved.
    pub fn replace_driver(&self, handle: DriverHandle) {
        debug!(store = %self.name, ?handle, "replacing driver");
        *self.handle.write().unwrap_or_else(PoisonError::into_inner) = handle;
    }

    /// Shard size in chars for the current driver.
    pub fn max_raw_size(&self) -> usize {
        self.max_raw_size_for(self.driver().as_ref())
    }

    fn max_raw_size_for(&self, driver: &dyn Driver) -> usize {
        match self.max_raw_size.unwrap_or_else(|| driver.max_raw_size()) {
            0 => DEFAULT_MAX_RAW_SIZE,
            size => clamp_max_raw_size(size),
        }
    }

    fn driver(&self) -> Arc<dyn Driver> {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_driver()
    }

    /// Prepare the driver and check the encryption marker.
    pub async fn init(&self) -> Result<()> {
        self.driver().init().await?;
        self.reset_if_encryption_changed().await
    }

    /// Every logical key, the encryption marker excluded.
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        let raw = self.driver().all_raw_keys().await?;
        Ok(raw
            .iter()
            .filter_map(|key| logical_key(key))
            .filter(|key| *key != self.marker_key)
            .map(str::to_string)
            .collect())
    }

    /// Read and decrypt a logical entry.
    ///
    /// Unreadable entries (a missing shard, a malformed record, a payload the
    /// policy cannot decrypt) read as `None`. Driver errors on shard 0 are
    /// returned.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let driver = self.driver();
        let Some(first) = driver.get_raw(&raw_key(key, 0)).await? else {
            return Ok(None);
        };

        match self.reassemble(driver.as_ref(), key, first).await {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!(store = %self.name, key, error = %e, "unreadable entry");
                Ok(None)
            }
        }
    }

    async fn reassemble(&self, driver: &dyn Driver, key: &str, first: Value) -> Result<Value> {
        let first = ShardRecord::from_value(first)?;
        let count = first.shard_count();
        let mut payload = first.data;

        if count > 1 {
            let keys = raw_keys(key, count);
            let rest = join_all(keys[1..].iter().map(|k| driver.get_raw(k))).await;
            for (offset, shard) in rest.into_iter().enumerate() {
                let value = shard?.ok_or_else(|| {
                    CoreError::MalformedShard(format!(
                        "shard {} of {} missing from {:?}",
                        offset + 1,
                        count,
                        key
                    ))
                })?;
                payload.push_str(&ShardRecord::from_value(value)?.data);
            }
        }

        Ok(self.policy.decrypt(&payload)?)
    }

    /// Encrypt and write a logical entry.
    pub async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let driver = self.driver();
        let max = self.max_raw_size_for(driver.as_ref());

        let items = self.shard_items(key, value, max)?;
        let stale = self.stale_shards(driver.as_ref(), key, items.len()).await?;

        driver.set_raw(items).await?;
        if !stale.is_empty() {
            driver.remove_raw(stale).await?;
        }
        Ok(())
    }

    /// Encrypt and write several entries in one driver call. When a key
    /// appears more than once, its last entry wins.
    pub async fn set_many(&self, entries: &[(String, Value)]) -> Result<()> {
        let driver = self.driver();
        let max = self.max_raw_size_for(driver.as_ref());

        let mut last = HashMap::new();
        for (index, (key, _)) in entries.iter().enumerate() {
            last.insert(key.as_str(), index);
        }
        let entries: Vec<&(String, Value)> = entries
            .iter()
            .enumerate()
            .filter(|(index, (key, _))| last.get(key.as_str()) == Some(index))
            .map(|(_, entry)| entry)
            .collect();

        let mut items = Vec::new();
        let mut kept = Vec::with_capacity(entries.len());
        for (key, value) in &entries {
            let shards = self.shard_items(key, value, max)?;
            kept.push(shards.len());
            items.extend(shards);
        }

        let stale = join_all(
            entries
                .iter()
                .zip(kept)
                .map(|((key, _), keep)| self.stale_shards(driver.as_ref(), key, keep)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?
        .concat();

        driver.set_raw(items).await?;
        if !stale.is_empty() {
            driver.remove_raw(stale).await?;
        }
        Ok(())
    }

    fn shard_items(&self, key: &str, value: &Value, max_raw_size: usize) -> Result<Vec<RawItem>> {
        let payload = self.policy.encrypt(value)?;
        Ok(shardify(key, &payload, max_raw_size)
            .into_iter()
            .map(|(raw, record)| RawItem::new(raw, record.into_value()))
            .collect())
    }

    /// Shards of the stored entry beyond the first `keep`.
    async fn stale_shards(&self, driver: &dyn Driver, key: &str, keep: usize) -> Result<Vec<String>> {
        let stored = self.stored_shard_count(driver, key).await?.unwrap_or(0);
        Ok((keep..stored).map(|index| raw_key(key, index)).collect())
    }

    /// Shard count of the stored entry, `None` when there is no shard 0.
    async fn stored_shard_count(&self, driver: &dyn Driver, key: &str) -> Result<Option<usize>> {
        let first = driver.get_raw(&raw_key(key, 0)).await?;
        Ok(first.map(|value| {
            ShardRecord::from_value(value)
                .map(|record| record.shard_count())
                .unwrap_or(1)
        }))
    }

    /// Delete a logical entry. Returns `false`, without writing, if absent.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let driver = self.driver();
        let Some(count) = self.stored_shard_count(driver.as_ref(), key).await? else {
            return Ok(false);
        };

        driver.remove_raw(raw_keys(key, count)).await?;
        Ok(true)
    }

    /// Delete several entries in one driver call. Absent keys are skipped.
    pub async fn remove_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        let driver = self.driver();

        let mut raw = Vec::new();
        for key in keys {
            let key = key.as_ref();
            if let Some(count) = self.stored_shard_count(driver.as_ref(), key).await? {
                raw.extend(raw_keys(key, count));
            }
        }

        if !raw.is_empty() {
            driver.remove_raw(raw).await?;
        }
        Ok(())
    }

    /// Remove every record of the store, the marker included.
    pub async fn clear(&self) -> Result<()> {
        self.driver().clear().await?;
        Ok(())
    }

    /// Compare the stored marker with the current policy; wipe on mismatch.
    ///
    /// A marker that exists but cannot be read under the current policy is a
    /// mismatch. The fresh marker is written in every case.
    pub async fn reset_if_encryption_changed(&self) -> Result<()> {
        let current = self.policy.encrypt(&encryption_probe())?;
        let driver = self.driver();

        if driver.get_raw(&raw_key(&self.marker_key, 0)).await?.is_some() {
            let stored = self.get(&self.marker_key).await?;
            let previous = stored
                .as_ref()
                .and_then(|marker| marker.get(MARKER_FIELD))
                .and_then(Value::as_str);

            if previous != Some(current.as_str()) {
                warn!(store = %self.name, "encryption policy changed, clearing store");
                driver.clear().await?;
            }
        }

        self.set(&self.marker_key, &json!({ MARKER_FIELD: current }))
            .await
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("handle", &self.handle())
            .finish_non_exhaustive()
    }
}
