//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{Map, Value};

use tessera_core::MINIMUM_MAX_RAW_SIZE;

/// Generate a logical key. Never ends in a shard suffix.
pub fn key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}".prop_map(String::from)
}

/// Generate a shard size, from the floor up to a few hundred chars.
pub fn max_raw_size() -> impl Strategy<Value = usize> {
    MINIMUM_MAX_RAW_SIZE..=300usize
}

/// Generate text mixing ASCII and multi-byte chars.
pub fn text(max_len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            4 => any::<char>().prop_filter("printable", |c| !c.is_control()),
            1 => Just('é'),
            1 => Just('🧩'),
        ],
        0..=max_len,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        text(64).prop_map(Value::String),
    ]
}

/// Generate an arbitrary JSON value of bounded depth.
pub fn json_value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            prop::collection::btree_map(key(), inner, 0..8)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Generate a batch of distinct keys with values.
pub fn entries(max: usize) -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map(key(), json_value(), 1..=max)
        .prop_map(|entries| entries.into_iter().collect())
}
