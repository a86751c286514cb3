//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use tessera::{DriverHandle, Engine, EngineConfig};
use tessera_core::EncryptionPolicy;
use tessera_store::{
    MemoryDriver, MemoryDriverConfig, MemoryRegistry, ScriptedMedium, SessionDriver,
    SessionDriverConfig,
};

/// Latency-free memory driver settings.
pub fn instant_memory() -> MemoryDriverConfig {
    MemoryDriverConfig {
        read_delay: Duration::ZERO,
        write_delay: Duration::ZERO,
    }
}

/// An engine over a memory driver, with the driver kept at hand.
pub struct MemoryFixture {
    pub engine: Engine,
    pub driver: Arc<MemoryDriver>,
    pub registry: Arc<MemoryRegistry>,
}

impl MemoryFixture {
    /// Engine with the memory driver's own ceiling.
    pub fn new(name: &str) -> Self {
        Self::build(EngineConfig::new(name), MemoryRegistry::new())
    }

    /// Engine with a shard size override.
    pub fn with_max_raw_size(name: &str, max_raw_size: usize) -> Self {
        Self::build(
            EngineConfig::new(name).with_max_raw_size(max_raw_size),
            MemoryRegistry::new(),
        )
    }

    /// A second engine on the same records, under a different policy.
    pub fn reopen_with(&self, policy: Arc<dyn EncryptionPolicy>) -> Self {
        let config = EngineConfig::new(self.engine.name()).with_policy(policy);
        Self::build(config, Arc::clone(&self.registry))
    }

    fn build(config: EngineConfig, registry: Arc<MemoryRegistry>) -> Self {
        let driver = Arc::new(MemoryDriver::with_registry(
            config.name.clone(),
            &registry,
            instant_memory(),
        ));
        Self {
            engine: Engine::new(config, DriverHandle::Memory(Arc::clone(&driver))),
            driver,
            registry,
        }
    }

    /// Raw keys belonging to `key`, in shard order.
    pub fn shard_keys(&self, key: &str) -> Vec<String> {
        let prefix = format!("{}.", key);
        let mut shards: Vec<(usize, String)> = self
            .driver
            .raw_data()
            .into_keys()
            .filter_map(|raw| {
                let index = raw.strip_prefix(&prefix)?.parse::<usize>().ok()?;
                Some((index, raw))
            })
            .collect();
        shards.sort();
        shards.into_iter().map(|(_, raw)| raw).collect()
    }
}

/// An engine over a session driver on a scripted medium.
pub struct ScriptedFixture {
    pub engine: Engine,
    pub driver: Arc<SessionDriver<ScriptedMedium>>,
    pub medium: Arc<ScriptedMedium>,
}

impl ScriptedFixture {
    /// Fixture with a short reopen delay and the given shard size.
    pub fn new(name: &str, max_raw_size: usize) -> Self {
        let medium = ScriptedMedium::new();
        let driver = Arc::new(SessionDriver::with_config(
            name,
            Arc::clone(&medium),
            SessionDriverConfig {
                reopen_delay: Duration::from_millis(2),
                ..Default::default()
            },
        ));
        let engine = Engine::new(
            EngineConfig::new(name).with_max_raw_size(max_raw_size),
            DriverHandle::Session(driver.clone()),
        );
        Self {
            engine,
            driver,
            medium,
        }
    }

    /// Number of record writes (puts and deletes) in the medium log since the
    /// last drain.
    pub fn drain_writes(&self) -> usize {
        self.medium
            .take_log()
            .iter()
            .filter(|entry| entry.starts_with("put ") || entry.starts_with("delete "))
            .count()
    }
}
