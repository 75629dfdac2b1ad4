mod common;

use std::sync::Arc;

use common::{stub_driver, Harness};
use pagescout::events::{CorrelationId, EventType};
use pagescout::snapshot::{GatingRule, GatingTable, SnapshotError, SnapshotManager};
use sha2::{Digest, Sha256};

fn manager_for(harness: &Harness, dir: &tempfile::TempDir) -> SnapshotManager {
    SnapshotManager::new(
        dir.path(),
        GatingTable::default(),
        Arc::clone(&harness.scheduler),
        harness.events.clone(),
    )
}

#[tokio::test]
async fn capture_persists_manifest_before_returning() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().expect("snapshots dir");
    let snapshots = manager_for(&harness, &dir);
    let mut captured = harness
        .events
        .subscribe_to(&[EventType::SnapshotCaptured, EventType::SnapshotPersisted]);
    let (session_id, ctx) = harness.context_on("search_results_stub").await;

    let manifest = snapshots
        .capture(&ctx, "search_results")
        .await
        .expect("capture");

    // Entitled to read the manifest path immediately after return.
    let manifest_path = snapshots.manifest_path(&manifest.snapshot_id);
    let on_disk = std::fs::read(&manifest_path).expect("manifest present");
    let parsed: serde_json::Value = serde_json::from_slice(&on_disk).expect("manifest parses");
    assert_eq!(parsed["snapshot_id"], manifest.snapshot_id.as_str());
    assert_eq!(parsed["schema_version"], 1);

    // Id grammar: page name, then the session prefix.
    assert!(manifest.snapshot_id.starts_with("search_results_"));
    let session_hex = session_id.simple().to_string();
    assert!(manifest.snapshot_id.contains(&session_hex[..8]));
    assert_eq!(manifest.page_name, "search_results");

    // Checksum matches the stored bytes.
    let html = std::fs::read(&manifest.html_path).expect("html present");
    assert_eq!(hex::encode(Sha256::digest(&html)), manifest.checksum);
    assert_eq!(manifest.html_bytes, html.len() as u64);

    // Screenshot recorded and present.
    let shot = manifest.screenshot_path.as_ref().expect("screenshot path");
    assert!(shot.exists());

    assert_eq!(
        captured.try_recv().expect("recv").expect("event").event_type,
        EventType::SnapshotCaptured
    );
    assert_eq!(
        captured.try_recv().expect("recv").expect("event").event_type,
        EventType::SnapshotPersisted
    );
}

#[tokio::test]
async fn replay_round_trips_and_detects_tampering() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().expect("snapshots dir");
    let snapshots = manager_for(&harness, &dir);
    let (_sid, ctx) = harness.context_on("article_stub").await;

    let manifest = snapshots.capture(&ctx, "article").await.expect("capture");
    let manifest_path = snapshots.manifest_path(&manifest.snapshot_id);
    let correlation = CorrelationId::root();

    let (html, replayed) = snapshots
        .replay(&manifest_path, &correlation)
        .await
        .expect("replay");
    assert!(html.contains("firstHeading"));
    assert_eq!(replayed.snapshot_id, manifest.snapshot_id);

    // Flip a byte in the stored HTML; replay must fail integrity.
    std::fs::write(&manifest.html_path, html.replace("Alpha", "Beta")).expect("tamper");
    let err = snapshots
        .replay(&manifest_path, &correlation)
        .await
        .expect_err("tampered");
    assert!(matches!(err, SnapshotError::Integrity { .. }));

    let report = snapshots
        .verify(&manifest_path, &correlation)
        .await
        .expect("verify");
    assert!(report.manifest_present && report.manifest_parses && report.html_present);
    assert!(!report.checksum_matches);
    assert!(!report.passed());
}

#[tokio::test]
async fn missing_manifest_keeps_the_callers_correlation_id() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().expect("snapshots dir");
    let snapshots = manager_for(&harness, &dir);
    let correlation = CorrelationId::from_string("c-replayer.7");

    let missing = dir.path().join("never_captured.json");
    let err = snapshots
        .replay(&missing, &correlation)
        .await
        .expect_err("missing");
    match err {
        SnapshotError::ManifestMissing {
            path,
            correlation_id,
        } => {
            assert_eq!(path, missing);
            assert_eq!(correlation_id, correlation);
        }
        other => panic!("expected ManifestMissing, got {other:?}"),
    }
    // No side effects on disk.
    assert!(!missing.exists());
}

#[tokio::test]
async fn crashed_driver_leaves_no_partial_files() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().expect("snapshots dir");
    let snapshots = manager_for(&harness, &dir);
    let (_sid, ctx) = harness.context_on("search_stub").await;

    stub_driver(&ctx).set_crashed(true);
    let err = snapshots
        .capture(&ctx, "search_results")
        .await
        .expect_err("crashed");
    assert!(matches!(
        err,
        SnapshotError::Driver(pagescout::DriverError::Crashed(_))
    ));

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .flatten()
        .collect();
    assert!(
        leftovers.is_empty(),
        "no files should exist after a failed capture: {leftovers:?}"
    );
}

#[tokio::test]
async fn screenshot_failure_does_not_fail_the_capture() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().expect("snapshots dir");
    let snapshots = manager_for(&harness, &dir);
    let (_sid, ctx) = harness.context_on("search_stub").await;

    stub_driver(&ctx).set_fail_screenshots(true);
    let manifest = snapshots.capture(&ctx, "search").await.expect("capture");
    assert!(manifest.screenshot_path.is_none());
    assert!(manifest.screenshot_bytes.is_none());
    assert!(manifest.timings.screenshot_ms.is_none());

    let report = snapshots
        .verify(
            &snapshots.manifest_path(&manifest.snapshot_id),
            &CorrelationId::root(),
        )
        .await
        .expect("verify");
    assert!(report.passed());
}

#[tokio::test]
async fn same_session_captures_get_distinct_monotonic_ids() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().expect("snapshots dir");
    let snapshots = manager_for(&harness, &dir);
    let (_sid, ctx) = harness.context_on("search_stub").await;

    let first = snapshots.capture(&ctx, "page").await.expect("first");
    let second = snapshots.capture(&ctx, "page").await.expect("second");
    assert_ne!(first.snapshot_id, second.snapshot_id);
    assert!(second.captured_at > first.captured_at);
}

#[tokio::test]
async fn invalid_page_names_are_rejected_up_front() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().expect("snapshots dir");
    let snapshots = manager_for(&harness, &dir);
    let (_sid, ctx) = harness.context_on("search_stub").await;

    for bad in ["Search", "search results", "a/b", ""] {
        assert!(matches!(
            snapshots.capture(&ctx, bad).await,
            Err(SnapshotError::InvalidPageName(_))
        ));
    }
}

#[tokio::test]
async fn gated_page_types_wait_on_their_readiness_selector() {
    let harness = Harness::new();
    let _selectors = harness.load_selectors(&[(
        "match.json",
        r#"{
            "context": "match",
            "selectors": {
                "header": {
                    "strategies": [
                        { "kind": "css", "selector": ".match-header", "priority": 0, "weight": 1.0 }
                    ]
                }
            }
        }"#,
    )]);
    let dir = tempfile::tempdir().expect("snapshots dir");
    let gating = GatingTable::new(vec![GatingRule {
        pattern: "match_detail".into(),
        readiness_semantic_name: "match.header".into(),
        timeout_ms: 1000,
    }]);
    let snapshots = SnapshotManager::new(
        dir.path(),
        gating,
        Arc::clone(&harness.scheduler),
        harness.events.clone(),
    )
    .with_engine(Arc::clone(&harness.engine));
    let (_sid, ctx) = harness.context_on("match_stub").await;

    // The readiness selector resolves, so the gated capture proceeds.
    let manifest = snapshots
        .capture(&ctx, "match_detail")
        .await
        .expect("gated capture");
    assert_eq!(manifest.page_name, "match_detail");

    // Ungated page names skip the wait entirely even with no engine match.
    let manifest = snapshots
        .capture(&ctx, "other_page")
        .await
        .expect("ungated capture");
    assert_eq!(manifest.page_name, "other_page");
}
