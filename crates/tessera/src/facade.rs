//! The public facade.
//!
//! Picks a driver from configuration, initializes lazily on first use, falls
//! back to memory when the configured medium is unavailable, and tags every
//! stored value with its kind so that text, JSON, and binary blobs come back
//! as what they were.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use tessera_core::{EncryptionPolicy, JsonPolicy};
use tessera_store::{
    DriverKind, MemoryDriver, MemoryDriverConfig, MemoryRegistry, SessionDriver,
    SessionDriverConfig, SqliteMedium,
};

use crate::engine::{DriverHandle, Engine, EngineConfig};
use crate::error::{ErrorCode, Result, TesseraError};

/// Which driver a [`Tessera`] starts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DriverChoice {
    /// In-process memory.
    #[default]
    Memory,
    /// SQLite databases under `dir`, one per store.
    Session {
        /// Directory holding the database files.
        dir: PathBuf,
    },
}

/// Facade configuration.
#[derive(Clone)]
pub struct TesseraConfig {
    /// Store name.
    pub name: String,
    /// Enables [`Tessera::memory_store_for_debugging`].
    pub debug_mode: bool,
    /// Starting driver.
    pub driver: DriverChoice,
    /// Encryption policy. `None` means plain JSON.
    pub policy: Option<Arc<dyn EncryptionPolicy>>,
    /// Shard size override.
    pub max_raw_size: Option<usize>,
    /// Registry for memory drivers, including the fallback. A private one is
    /// created when unset.
    pub memory_registry: Option<Arc<MemoryRegistry>>,
    /// Memory driver latency.
    pub memory: MemoryDriverConfig,
    /// Session driver settings.
    pub session: SessionDriverConfig,
}

impl TesseraConfig {
    /// Defaults for a store called `name`: memory driver, JSON policy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            debug_mode: false,
            driver: DriverChoice::Memory,
            policy: None,
            max_raw_size: None,
            memory_registry: None,
            memory: MemoryDriverConfig::default(),
            session: SessionDriverConfig::default(),
        }
    }
}

impl fmt::Debug for TesseraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TesseraConfig")
            .field("name", &self.name)
            .field("debug_mode", &self.debug_mode)
            .field("driver", &self.driver)
            .field("max_raw_size", &self.max_raw_size)
            .field("memory", &self.memory)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// A value the facade can store.
#[derive(Debug, Clone, PartialEq)]
pub enum Storable {
    /// Plain text.
    Text(String),
    /// Any JSON value.
    Json(Value),
    /// A binary blob with its MIME type.
    Binary {
        /// MIME type, e.g. `image/png`.
        mime: String,
        /// Raw bytes.
        bytes: Vec<u8>,
    },
}

impl From<&str> for Storable {
    fn from(text: &str) -> Self {
        Storable::Text(text.to_string())
    }
}

impl From<String> for Storable {
    fn from(text: String) -> Self {
        Storable::Text(text)
    }
}

impl From<Value> for Storable {
    fn from(value: Value) -> Self {
        Storable::Json(value)
    }
}

/// Logical value as written to the engine.
#[derive(Debug, Serialize, Deserialize)]
struct StoredUnit {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

const KIND_STRING: &str = "string";
const KIND_JSON: &str = "json";
const KIND_BINARY: &str = "binary";

impl StoredUnit {
    fn encode(value: Storable) -> Value {
        let (kind, data) = match value {
            Storable::Text(text) => (KIND_STRING, Value::String(text)),
            Storable::Json(value) => (KIND_JSON, value),
            Storable::Binary { mime, bytes } => {
                let data_url = format!("data:{};base64,{}", mime, STANDARD.encode(bytes));
                (KIND_BINARY, json!({ "dataUrl": data_url, "type": mime }))
            }
        };
        json!({ "type": kind, "data": data })
    }

    fn decode(self) -> Result<Option<Storable>> {
        match (self.kind.as_str(), self.data) {
            (KIND_STRING, Value::String(text)) => Ok(Some(Storable::Text(text))),
            (KIND_JSON, value) => Ok(Some(Storable::Json(value))),
            (KIND_BINARY, data) => decode_binary(&data).map(Some),
            _ => Ok(None),
        }
    }
}

fn decode_binary(data: &Value) -> Result<Storable> {
    let data_url = data
        .get("dataUrl")
        .and_then(Value::as_str)
        .ok_or_else(|| TesseraError::DataEncodingFailed("missing dataUrl".into()))?;

    let (header, body) = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| TesseraError::DataEncodingFailed("not a data URL".into()))?;
    let header_mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| TesseraError::DataEncodingFailed("data URL is not base64".into()))?;

    let bytes = STANDARD
        .decode(body)
        .map_err(|e| TesseraError::DataEncodingFailed(e.to_string()))?;
    let mime = data
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(header_mime)
        .to_string();

    Ok(Storable::Binary { mime, bytes })
}

struct MemoryFallback {
    registry: Arc<MemoryRegistry>,
    config: MemoryDriverConfig,
}

impl MemoryFallback {
    fn driver(&self, name: &str) -> DriverHandle {
        DriverHandle::memory(MemoryDriver::with_registry(
            name,
            &self.registry,
            self.config.clone(),
        ))
    }
}

/// Key-value store over a [`Driver`](tessera_store::Driver), with sharding,
/// encryption, and tagged values.
pub struct Tessera {
    engine: Engine,
    debug_mode: bool,
    fallback: MemoryFallback,
    initialized: Mutex<bool>,
}

impl Tessera {
    /// Build a store from configuration. Nothing is opened yet.
    pub fn new(config: TesseraConfig) -> Self {
        let registry = config
            .memory_registry
            .clone()
            .unwrap_or_else(MemoryRegistry::new);
        let fallback = MemoryFallback {
            registry,
            config: config.memory.clone(),
        };

        let handle = match &config.driver {
            DriverChoice::Memory => fallback.driver(&config.name),
            DriverChoice::Session { dir } => DriverHandle::session(SessionDriver::with_config(
                config.name.clone(),
                SqliteMedium::new(dir),
                config.session.clone(),
            )),
        };

        Self::assemble(config, handle, fallback)
    }

    /// Build a store on a caller-supplied driver. `config.driver` is ignored.
    pub fn with_driver(config: TesseraConfig, handle: DriverHandle) -> Self {
        let fallback = MemoryFallback {
            registry: config
                .memory_registry
                .clone()
                .unwrap_or_else(MemoryRegistry::new),
            config: config.memory.clone(),
        };
        Self::assemble(config, handle, fallback)
    }

    fn assemble(config: TesseraConfig, handle: DriverHandle, fallback: MemoryFallback) -> Self {
        let mut engine_config = EngineConfig::new(config.name);
        engine_config.max_raw_size = config.max_raw_size;
        engine_config.policy = config.policy.unwrap_or_else(|| Arc::new(JsonPolicy));

        Self {
            engine: Engine::new(engine_config, handle),
            debug_mode: config.debug_mode,
            fallback,
            initialized: Mutex::new(false),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Driver variant currently in use.
    pub fn driver_kind(&self) -> DriverKind {
        self.engine.handle().kind()
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Initialize now instead of on first use.
    ///
    /// When the medium is unavailable the store switches to a memory driver
    /// for the rest of its life and tries once more.
    pub async fn init(&self) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }

        match self.engine.init().await {
            Ok(()) => {}
            Err(e) if e.code() == Some(ErrorCode::StorageNotAvailable) => {
                warn!(store = %self.name(), "storage not available, falling back to memory");
                self.engine
                    .replace_driver(self.fallback.driver(self.engine.name()));
                self.engine.init().await?;
            }
            Err(e) => return Err(e),
        }

        info!(store = %self.name(), driver = ?self.driver_kind(), "store initialized");
        *initialized = true;
        Ok(())
    }

    /// Store a value under `key`, replacing what was there.
    pub async fn save(&self, key: &str, value: impl Into<Storable>) -> Result<()> {
        self.init().await?;
        self.engine
            .set(key, &StoredUnit::encode(value.into()))
            .await
    }

    /// Store several values with one driver write.
    pub async fn save_many(&self, entries: Vec<(String, Storable)>) -> Result<()> {
        self.init().await?;
        let entries: Vec<(String, Value)> = entries
            .into_iter()
            .map(|(key, value)| (key, StoredUnit::encode(value)))
            .collect();
        self.engine.set_many(&entries).await
    }

    /// Load the value under `key`.
    ///
    /// Entries that are unreadable or carry an unknown tag load as `None`.
    /// A binary entry with a broken data URL is a `DataEncodingFailed` error.
    pub async fn load(&self, key: &str) -> Result<Option<Storable>> {
        self.init().await?;
        let Some(value) = self.engine.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_value::<StoredUnit>(value) {
            Ok(unit) => unit.decode(),
            Err(_) => Ok(None),
        }
    }

    /// Remove `key`. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.init().await?;
        self.engine.remove(key).await
    }

    /// Remove several keys with one driver write.
    pub async fn remove_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        self.init().await?;
        self.engine.remove_many(keys).await
    }

    /// Every stored key.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.init().await?;
        self.engine.list_keys().await
    }

    /// Remove everything.
    ///
    /// The encryption marker goes too; it is rewritten on the next start.
    pub async fn clear(&self) -> Result<()> {
        self.init().await?;
        self.engine.clear().await
    }

    /// Raw records of the memory driver.
    ///
    /// Needs `debug_mode` and a store running on memory, either configured
    /// or through the fallback.
    pub fn memory_store_for_debugging(&self) -> Result<BTreeMap<String, Value>> {
        if !self.debug_mode {
            return Err(TesseraError::DebuggingModeRequired);
        }
        match self.engine.handle() {
            DriverHandle::Memory(driver) => Ok(driver.raw_data()),
            DriverHandle::Session(_) => Err(TesseraError::DebuggingModeRequired),
        }
    }
}

impl fmt::Debug for Tessera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tessera")
            .field("engine", &self.engine)
            .field("debug_mode", &self.debug_mode)
            .finish_non_exhaustive()
    }
}
