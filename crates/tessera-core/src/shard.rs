//! Shard records and the raw-key layout.
//!
//! A logical entry `key` is stored as records `key.0`, `key.1`, ... Each record
//! holds a contiguous slice of the encrypted payload. Record 0 additionally
//! carries the total number of shards, so a reader always fetches it first.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Suffix of the raw key holding shard 0.
pub const SHARD_ZERO_SUFFIX: &str = ".0";

/// Shard size used when neither the driver nor the caller picks one.
pub const DEFAULT_MAX_RAW_SIZE: usize = 4096;

/// Smallest shard size accepted. Smaller requests are raised to this floor.
pub const MINIMUM_MAX_RAW_SIZE: usize = 10;

/// One physical record of a sharded value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRecord {
    /// Slice of the encrypted payload.
    pub data: String,

    /// Total shard count. Present on shard 0 only.
    #[serde(
        rename = "numberOfShards",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub number_of_shards: Option<usize>,
}

impl ShardRecord {
    /// Parse a record from the opaque value a driver hands back.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| CoreError::MalformedShard(e.to_string()))
    }

    /// Convert into the opaque value handed to a driver.
    pub fn into_value(self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("data".to_string(), Value::String(self.data));
        if let Some(count) = self.number_of_shards {
            map.insert("numberOfShards".to_string(), Value::from(count));
        }
        Value::Object(map)
    }

    /// Shard count announced by this record, never less than 1.
    pub fn shard_count(&self) -> usize {
        self.number_of_shards.unwrap_or(1).max(1)
    }
}

/// Physical key for shard `index` of `key`.
pub fn raw_key(key: &str, index: usize) -> String {
    format!("{}.{}", key, index)
}

/// Physical keys for all `count` shards of `key`, in index order.
pub fn raw_keys(key: &str, count: usize) -> Vec<String> {
    (0..count.max(1)).map(|index| raw_key(key, index)).collect()
}

/// Logical key of a raw key, if the raw key denotes shard 0.
pub fn logical_key(raw_key: &str) -> Option<&str> {
    raw_key.strip_suffix(SHARD_ZERO_SUFFIX)
}

/// Apply the minimum floor to a requested shard size.
pub fn clamp_max_raw_size(size: usize) -> usize {
    size.max(MINIMUM_MAX_RAW_SIZE)
}

/// Number of shards needed for `payload`.
///
/// Length is counted in `char`s. An empty payload still occupies shard 0.
pub fn shard_count(payload: &str, max_raw_size: usize) -> usize {
    payload.chars().count().div_ceil(max_raw_size.max(1)).max(1)
}

/// Slice `payload` into contiguous pieces of at most `max_raw_size` chars.
pub fn split_payload(payload: &str, max_raw_size: usize) -> Vec<&str> {
    let max = max_raw_size.max(1);
    if payload.is_empty() {
        return vec![""];
    }

    let mut pieces = Vec::with_capacity(shard_count(payload, max));
    let mut rest = payload;
    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(max)
            .map(|(offset, _)| offset)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

/// Lay out an encrypted payload as `(raw_key, record)` pairs.
pub fn shardify(key: &str, payload: &str, max_raw_size: usize) -> Vec<(String, ShardRecord)> {
    let pieces = split_payload(payload, max_raw_size);
    let count = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let record = ShardRecord {
                data: piece.to_string(),
                number_of_shards: (index == 0).then_some(count),
            };
            (raw_key(key, index), record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_raw_key_layout() {
        assert_eq!(raw_key("user", 0), "user.0");
        assert_eq!(raw_key("a.b", 12), "a.b.12");
        assert_eq!(raw_keys("k", 3), vec!["k.0", "k.1", "k.2"]);
    }

    #[test]
    fn test_logical_key_only_for_shard_zero() {
        assert_eq!(logical_key("user.0"), Some("user"));
        assert_eq!(logical_key("x.0.0"), Some("x.0"));
        assert_eq!(logical_key("user.1"), None);
        assert_eq!(logical_key("user.10"), None);
    }

    #[test]
    fn test_empty_payload_has_one_shard() {
        assert_eq!(shard_count("", 16), 1);
        let shards = shardify("k", "", 16);
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].1.number_of_shards, Some(1));
        assert_eq!(shards[0].1.data, "");
    }

    #[test]
    fn test_split_exact_multiple() {
        let pieces = split_payload("abcdefghij", 5);
        assert_eq!(pieces, vec!["abcde", "fghij"]);
        assert_eq!(shard_count("abcdefghij", 5), 2);
        assert_eq!(shard_count("abcdefghijk", 5), 3);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let payload = "ééééé";
        let pieces = split_payload(payload, 2);
        assert_eq!(pieces, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn test_only_first_shard_carries_count() {
        let shards = shardify("doc", &"x".repeat(25), 10);
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0].0, "doc.0");
        assert_eq!(shards[0].1.number_of_shards, Some(3));
        assert!(shards[1..].iter().all(|(_, r)| r.number_of_shards.is_none()));
    }

    #[test]
    fn test_clamp_floor() {
        assert_eq!(clamp_max_raw_size(1), MINIMUM_MAX_RAW_SIZE);
        assert_eq!(clamp_max_raw_size(4096), 4096);
    }

    #[test]
    fn test_record_value_shape() {
        let record = ShardRecord {
            data: "abc".into(),
            number_of_shards: Some(2),
        };
        let value = record.clone().into_value();
        assert_eq!(value, json!({ "data": "abc", "numberOfShards": 2 }));
        assert_eq!(ShardRecord::from_value(value).unwrap(), record);

        let tail = ShardRecord::from_value(json!({ "data": "def" })).unwrap();
        assert_eq!(tail.number_of_shards, None);
        assert_eq!(tail.shard_count(), 1);
    }

    #[test]
    fn test_malformed_record() {
        let err = ShardRecord::from_value(json!({ "payload": 1 })).unwrap_err();
        assert!(matches!(err, CoreError::MalformedShard(_)));
    }

    proptest! {
        #[test]
        fn split_then_join_is_identity(payload in ".{0,200}", max in 1usize..40) {
            let pieces = split_payload(&payload, max);
            prop_assert_eq!(pieces.len(), shard_count(&payload, max));
            prop_assert!(pieces.iter().all(|p| p.chars().count() <= max));
            prop_assert_eq!(pieces.concat(), payload);
        }
    }
}
