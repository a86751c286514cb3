//! # Tessera Testkit
//!
//! Testing utilities for Tessera.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: engines wired to the memory driver or a scripted session driver
//! - **Generators**: Proptest strategies for values, keys, and shard sizes
//! - **Policies**: deterministic non-JSON encryption policies
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tessera_testkit::generators::json_value;
//!
//! proptest! {
//!     #[test]
//!     fn any_value_round_trips(value in json_value()) {
//!         // ...
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use tessera_testkit::fixtures::MemoryFixture;
//!
//! let fixture = MemoryFixture::with_max_raw_size("docs", 16);
//! assert_eq!(fixture.engine.max_raw_size(), 16);
//! ```

pub mod fixtures;
pub mod generators;
pub mod policies;

pub use fixtures::{MemoryFixture, ScriptedFixture};
pub use policies::{PrefixPolicy, ReversePolicy};

/// Install a test log subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}
