//! # Tessera
//!
//! Key-value storage for values of any size on backends that limit how large
//! a single record may be.
//!
//! ## Overview
//!
//! Tessera sits on top of a [`Driver`](tessera_store::Driver) and provides:
//!
//! - **Sharding**: values are encrypted into one string and split into tiles
//!   no larger than the backend accepts, then put back together on read
//! - **Encryption check**: a marker entry notices when the encryption policy
//!   changed between runs and wipes the data it can no longer read
//! - **Resilient sessions**: the session driver parks requests while the
//!   medium reconnects instead of failing them
//! - **Tagged values**: text, JSON, and binary blobs round-trip as themselves
//!
//! ## Usage
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tessera::{DriverChoice, Storable, Tessera, TesseraConfig};
//!
//! async fn example() {
//!     let store = Tessera::new(TesseraConfig {
//!         driver: DriverChoice::Session { dir: "/var/lib/app".into() },
//!         ..TesseraConfig::new("settings")
//!     });
//!
//!     store.save("theme", "dark").await.unwrap();
//!     store.save("layout", json!({ "columns": 3 })).await.unwrap();
//!
//!     assert_eq!(
//!         store.load("theme").await.unwrap(),
//!         Some(Storable::Text("dark".into()))
//!     );
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tessera::core` - Policies and the shard layout
//! - `tessera::store` - Drivers and media

pub mod engine;
pub mod error;
pub mod facade;

pub use tessera_core as core;
pub use tessera_store as store;

pub use engine::{DriverHandle, Engine, EngineConfig, MARKER_SUFFIX};
pub use error::{ErrorCode, Result, TesseraError};
pub use facade::{DriverChoice, Storable, Tessera, TesseraConfig};

pub use tessera_core::{EncryptionPolicy, JsonPolicy};
pub use tessera_store::{Driver, DriverKind, MemoryDriver, MemoryRegistry, SessionDriver};
