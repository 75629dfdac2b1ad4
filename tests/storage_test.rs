mod common;

use pagescout::events::{CorrelationId, EventBus, EventType};
use pagescout::storage::{FsStateStore, StateStore};
use proptest::prelude::*;
use serde_json::json;

fn store_in(dir: &tempfile::TempDir) -> FsStateStore {
    FsStateStore::new(dir.path(), EventBus::default())
}

#[tokio::test]
async fn store_load_delete_round_trip() {
    let dir = tempfile::tempdir().expect("dir");
    let store = store_in(&dir);
    let correlation = CorrelationId::root();

    let value = json!({
        "schema_version": 1,
        "cookies": [{"name": "sid", "value": "abc"}],
        "url": "https://example.com/a?b=c"
    });
    store
        .store("sessions/s1/states/latest", value.clone(), &correlation)
        .await
        .expect("store");
    let loaded = store
        .load("sessions/s1/states/latest")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded, value);

    store
        .delete("sessions/s1/states/latest", &correlation)
        .await
        .expect("delete");
    assert!(
        store
            .load("sessions/s1/states/latest")
            .await
            .expect("load")
            .is_none()
    );
}

#[tokio::test]
async fn delete_on_a_missing_key_is_a_no_op() {
    let dir = tempfile::tempdir().expect("dir");
    let store = store_in(&dir);
    store
        .delete("never/written", &CorrelationId::root())
        .await
        .expect("missing delete succeeds");
}

#[tokio::test]
async fn list_filters_by_prefix() {
    let dir = tempfile::tempdir().expect("dir");
    let store = store_in(&dir);
    let correlation = CorrelationId::root();

    for key in ["sessions/a/states/one", "sessions/a/states/two", "sessions/b/states/one"] {
        store.store(key, json!({}), &correlation).await.expect("store");
    }

    let all = store.list(None).await.expect("list");
    assert_eq!(all.len(), 3);
    let only_a = store.list(Some("sessions/a/")).await.expect("list");
    assert_eq!(
        only_a,
        vec![
            "sessions/a/states/one".to_string(),
            "sessions/a/states/two".to_string()
        ]
    );
}

#[tokio::test]
async fn store_leaves_no_tmp_files_and_emits_events() {
    let dir = tempfile::tempdir().expect("dir");
    let events = EventBus::default();
    let mut subscriber = events.subscribe_to(&[EventType::StorageStore, EventType::StorageDelete]);
    let store = FsStateStore::new(dir.path(), events);
    let correlation = CorrelationId::root();

    store
        .store("k", json!({"v": 1}), &correlation)
        .await
        .expect("store");
    store.delete("k", &correlation).await.expect("delete");

    let stored = subscriber.try_recv().expect("recv").expect("event");
    assert_eq!(stored.event_type, EventType::StorageStore);
    assert_eq!(stored.correlation_id, correlation);
    let deleted = subscriber.try_recv().expect("recv").expect("event");
    assert_eq!(deleted.event_type, EventType::StorageDelete);

    // Atomic write path: no .tmp siblings survive.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .flatten()
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn traversal_and_malformed_keys_are_rejected() {
    let dir = tempfile::tempdir().expect("dir");
    let store = store_in(&dir);
    let correlation = CorrelationId::root();

    for key in ["../escape", "a//b", "", "a/./b", "spa ce"] {
        assert!(
            store.store(key, json!({}), &correlation).await.is_err(),
            "key {key:?} should be rejected"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_json_value_round_trips(
        text in "[a-zA-Z0-9 _.:/-]{0,64}",
        number in proptest::num::f64::NORMAL,
        flag in proptest::bool::ANY,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let dir = tempfile::tempdir().expect("dir");
            let store = store_in(&dir);
            let value = json!({
                "schema_version": 1,
                "text": text,
                "number": number,
                "flag": flag,
                "nested": { "list": [text, text] }
            });
            store
                .store("prop/value", value.clone(), &CorrelationId::root())
                .await
                .expect("store");
            let loaded = store.load("prop/value").await.expect("load").expect("present");
            assert_eq!(loaded, value);
        });
    }
}
