//! # Tessera Core
//!
//! Primitives shared by the Tessera crates: encryption policies, the shard
//! record format, and the raw-key layout.
//!
//! ## Key Types
//!
//! - [`EncryptionPolicy`] - Pluggable value <-> string conversion
//! - [`JsonPolicy`] - The default policy (plain JSON)
//! - [`ShardRecord`] - One physical slice of an encrypted value
//!
//! ## Layout
//!
//! ```rust
//! use tessera_core::{shardify, logical_key};
//!
//! let shards = shardify("profile", "0123456789abcdef", 10);
//! assert_eq!(shards.len(), 2);
//! assert_eq!(shards[0].0, "profile.0");
//! assert_eq!(shards[0].1.number_of_shards, Some(2));
//! assert_eq!(logical_key(&shards[0].0), Some("profile"));
//! ```

pub mod error;
pub mod policy;
pub mod shard;

pub use error::{CoreError, Result};
pub use policy::{encryption_probe, EncryptionPolicy, JsonPolicy};
pub use shard::{
    clamp_max_raw_size, logical_key, raw_key, raw_keys, shard_count, shardify, split_payload,
    ShardRecord, DEFAULT_MAX_RAW_SIZE, MINIMUM_MAX_RAW_SIZE, SHARD_ZERO_SUFFIX,
};
