//! # Tessera Store
//!
//! Backend drivers for Tessera. Provides a trait-based interface for raw
//! record persistence with an in-memory driver and a session driver that
//! survives a medium opening slowly, failing to open, or closing on its own.
//!
//! ## Overview
//!
//! The engine above talks to a [`Driver`] only. Two variants exist:
//!
//! - [`MemoryDriver`] - In-process map with artificial latency
//! - [`SessionDriver`] - Connection state machine over any [`Medium`]
//!
//! Media for the session driver:
//!
//! - [`SqliteMedium`] - One SQLite file per store
//! - [`ScriptedMedium`] - In-memory medium with fault injection, for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tessera_store::{Driver, RawItem, SessionDriver, SqliteMedium};
//!
//! async fn example() {
//!     let medium = SqliteMedium::new("/var/lib/tessera");
//!     let driver = SessionDriver::new("settings", medium);
//!     driver.init().await.unwrap();
//!
//!     driver
//!         .set_raw(vec![RawItem::new("theme.0", json!({ "data": "\"dark\"" }))])
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **No dropped requests**: operations issued while reconnecting are parked
//!   and resumed in arrival order once the session is back
//! - **Single-flight open**: at most one open attempt is in flight per driver
//! - **Schema once**: the record container is created only when the medium
//!   reports an upgrade is needed

pub mod error;
pub mod medium;
pub mod memory;
pub mod migration;
pub mod scripted;
pub mod session;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use medium::{Access, Medium, ObjectStore, Opened, Session};
pub use memory::{MemoryDriver, MemoryDriverConfig, MemoryRegistry, MEMORY_ITEM_SIZE_LIMIT};
pub use scripted::ScriptedMedium;
pub use session::{
    ConnectionState, SessionDriver, SessionDriverConfig, DEFAULT_REOPEN_DELAY, RECORD_CONTAINER,
    SESSION_ITEM_SIZE_LIMIT,
};
pub use sqlite::SqliteMedium;
pub use traits::{Driver, DriverKind, RawItem};
