//! Engine properties checked across drivers.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};
use tessera_core::{EncryptionPolicy, JsonPolicy};
use tessera_store::ConnectionState;
use tessera_testkit::generators::{entries, json_value, key, max_raw_size};
use tessera_testkit::{init_tracing, MemoryFixture, PrefixPolicy, ReversePolicy, ScriptedFixture};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn encrypted_len(value: &Value) -> usize {
    JsonPolicy.encrypt(value).unwrap().chars().count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn set_then_get_returns_the_value(key in key(), value in json_value(), max in max_raw_size()) {
        let fixture = MemoryFixture::with_max_raw_size("props", max);
        let got = runtime().block_on(async {
            fixture.engine.init().await.unwrap();
            fixture.engine.set(&key, &value).await.unwrap();
            fixture.engine.get(&key).await.unwrap()
        });
        prop_assert_eq!(got, Some(value));
    }

    #[test]
    fn shard_count_matches_payload_length(key in key(), value in json_value(), max in max_raw_size()) {
        let fixture = MemoryFixture::with_max_raw_size("props", max);
        runtime().block_on(async {
            fixture.engine.init().await.unwrap();
            fixture.engine.set(&key, &value).await.unwrap();
        });

        let expected = encrypted_len(&value).div_ceil(max).max(1);
        let shards = fixture.shard_keys(&key);
        prop_assert_eq!(shards.len(), expected);

        let records = fixture.driver.raw_data();
        for (index, raw) in shards.iter().enumerate() {
            let count = records[raw.as_str()].get("numberOfShards").cloned();
            if index == 0 {
                prop_assert_eq!(count, Some(json!(expected)));
            } else {
                prop_assert_eq!(count, None);
            }
        }
    }

    #[test]
    fn overwrite_leaves_only_the_new_shards(
        key in key(),
        first in json_value(),
        second in json_value(),
        max in max_raw_size(),
    ) {
        let fixture = MemoryFixture::with_max_raw_size("props", max);
        let got = runtime().block_on(async {
            fixture.engine.init().await.unwrap();
            fixture.engine.set(&key, &first).await.unwrap();
            fixture.engine.set(&key, &second).await.unwrap();
            fixture.engine.get(&key).await.unwrap()
        });

        prop_assert_eq!(got, Some(second.clone()));
        prop_assert_eq!(
            fixture.shard_keys(&key).len(),
            encrypted_len(&second).div_ceil(max).max(1)
        );
    }

    #[test]
    fn list_keys_names_each_entry_once(batch in entries(12), max in max_raw_size()) {
        let fixture = MemoryFixture::with_max_raw_size("props", max);
        let listed = runtime().block_on(async {
            fixture.engine.init().await.unwrap();
            fixture.engine.set_many(&batch).await.unwrap();
            fixture.engine.list_keys().await.unwrap()
        });

        let unique: BTreeSet<&String> = listed.iter().collect();
        prop_assert_eq!(unique.len(), listed.len());
        prop_assert_eq!(
            unique,
            batch.iter().map(|(key, _)| key).collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn remove_many_leaves_nothing_behind(batch in entries(8), max in max_raw_size()) {
        let fixture = MemoryFixture::with_max_raw_size("props", max);
        let keys: Vec<String> = batch.iter().map(|(key, _)| key.clone()).collect();
        let listed = runtime().block_on(async {
            fixture.engine.init().await.unwrap();
            fixture.engine.set_many(&batch).await.unwrap();
            fixture.engine.remove_many(&keys).await.unwrap();
            fixture.engine.list_keys().await.unwrap()
        });

        prop_assert!(listed.is_empty());
        // Only the marker remains, however many shards it needed.
        let marker: BTreeSet<String> = fixture
            .shard_keys(fixture.engine.marker_key())
            .into_iter()
            .collect();
        let remaining: BTreeSet<String> = fixture.driver.raw_data().into_keys().collect();
        prop_assert!(!marker.is_empty());
        prop_assert_eq!(remaining, marker);
    }
}

#[tokio::test]
async fn batch_writes_touch_only_their_shards() {
    init_tracing();
    let fixture = ScriptedFixture::new("batch", 10);
    fixture.engine.init().await.unwrap();
    fixture.drain_writes();

    fixture
        .engine
        .set_many(&[
            ("a".to_string(), json!("0123456789")),
            ("b".to_string(), json!("x")),
        ])
        .await
        .unwrap();
    // "0123456789" is 12 chars of JSON: two shards, plus one for "b".
    assert_eq!(fixture.drain_writes(), 3);

    fixture.engine.remove("nope").await.unwrap();
    fixture.engine.remove_many(&["nope", "never"]).await.unwrap();
    assert_eq!(fixture.drain_writes(), 0);

    fixture.engine.remove_many(&["a", "b"]).await.unwrap();
    assert_eq!(fixture.drain_writes(), 3);
}

#[tokio::test]
async fn removing_everything_keeps_a_sharded_marker() {
    // The marker needs several shards at this ceiling.
    let fixture = MemoryFixture::with_max_raw_size("tiny", 10);
    fixture.engine.init().await.unwrap();
    let marker = fixture.shard_keys(fixture.engine.marker_key());
    assert!(marker.len() > 1);

    let batch = vec![
        ("one".to_string(), json!("first value")),
        ("two".to_string(), json!([1, 2, 3, 4, 5])),
    ];
    fixture.engine.set_many(&batch).await.unwrap();
    fixture.engine.remove_many(&["one", "two"]).await.unwrap();

    assert!(fixture.engine.list_keys().await.unwrap().is_empty());
    let remaining: BTreeSet<String> = fixture.driver.raw_data().into_keys().collect();
    assert_eq!(remaining, marker.into_iter().collect::<BTreeSet<_>>());
}

#[tokio::test]
async fn changed_policy_wipes_the_store() {
    init_tracing();
    let fixture = MemoryFixture::new("wipe");
    fixture.engine.init().await.unwrap();
    fixture.engine.set("a", &json!("plain")).await.unwrap();
    fixture.engine.set("b", &json!([1, 2, 3])).await.unwrap();

    let tagged = fixture.reopen_with(Arc::new(PrefixPolicy::new("v2")));
    tagged.engine.init().await.unwrap();
    assert!(tagged.engine.list_keys().await.unwrap().is_empty());
    assert_eq!(tagged.engine.get("a").await.unwrap(), None);

    tagged.engine.set("c", &json!("sealed")).await.unwrap();

    // Same policy again: nothing is lost.
    let again = tagged.reopen_with(Arc::new(PrefixPolicy::new("v2")));
    again.engine.init().await.unwrap();
    assert_eq!(again.engine.get("c").await.unwrap(), Some(json!("sealed")));

    // A policy that cannot even read the marker counts as a change.
    let reversed = again.reopen_with(Arc::new(ReversePolicy));
    reversed.engine.init().await.unwrap();
    assert_eq!(reversed.engine.get("c").await.unwrap(), None);
}

#[tokio::test]
async fn first_init_only_writes_the_marker() {
    let fixture = ScriptedFixture::new("fresh", 100);
    fixture.engine.init().await.unwrap();

    let log = fixture.medium.take_log();
    assert!(!log.contains(&"clear".to_string()));
    assert_eq!(
        fixture.medium.records("fresh").into_keys().collect::<Vec<_>>(),
        vec!["fresh.encryptcheck.0"]
    );
}

#[tokio::test]
async fn entries_outlive_a_connection_drop() {
    init_tracing();
    let fixture = ScriptedFixture::new("drop", 12);
    fixture.engine.init().await.unwrap();

    let value = json!({ "tiles": ["a", "b", "c", "d", "e", "f"] });
    fixture.engine.set("board", &value).await.unwrap();

    fixture.medium.close_all();
    while fixture.driver.state() == ConnectionState::Open {
        tokio::task::yield_now().await;
    }

    assert_eq!(fixture.engine.get("board").await.unwrap(), Some(value));
    assert_eq!(fixture.driver.state(), ConnectionState::Open);
    assert_eq!(fixture.medium.open_count(), 2);
}
