mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{test_pages_root, Harness};
use pagescout::config::{ManagerConfig, SessionConfigBuilder};
use pagescout::driver::Cookie;
use pagescout::events::{CorrelationId, EventBus, EventType};
use pagescout::scheduler::Scheduler;
use pagescout::session::{
    BrokenPipeHandle, BrowserBackend, DriverFactory, SessionError, SessionManager, SessionStatus,
    StubBackend,
};
use pagescout::snapshot::{GatingTable, SnapshotManager};
use pagescout::storage::FsStateStore;
use pagescout::{SessionConfig, WaitStrategy};

#[tokio::test]
async fn create_then_terminate_closes_everything() {
    let harness = Harness::new();
    let mut lifecycle = harness.events.subscribe_to(&[
        EventType::SessionCreated,
        EventType::ContextClosed,
        EventType::SessionTerminated,
    ]);

    let session = harness
        .manager
        .create_session(Some(harness.session_config()))
        .await
        .expect("create");
    assert_eq!(session.status(), SessionStatus::Active);
    let id = session.id();

    harness.manager.create_context(id).await.expect("ctx 1");
    harness.manager.create_context(id).await.expect("ctx 2");
    assert_eq!(session.context_count(), 2);

    let handles = session.subprocess_handles();
    assert!(!handles.is_empty());

    assert!(harness.manager.terminate(id).await);
    assert_eq!(session.status(), SessionStatus::Terminated);
    assert_eq!(session.context_count(), 0, "no contexts may survive termination");
    assert!(
        handles.iter().all(|h| h.is_closed()),
        "every tracked handle saw close()"
    );
    assert!(harness.manager.get_session(id).is_none());
    assert_eq!(harness.manager.open_subprocess_handles(), 0);

    // Idempotent: repeating is harmless and the state stays terminated.
    assert!(!harness.manager.terminate(id).await);
    assert_eq!(session.status(), SessionStatus::Terminated);

    let created = lifecycle.try_recv().expect("recv").expect("event");
    assert_eq!(created.event_type, EventType::SessionCreated);
    let mut saw_terminated = false;
    while let Ok(Some(event)) = lifecycle.try_recv() {
        if event.event_type == EventType::SessionTerminated {
            saw_terminated = true;
            assert_eq!(event.session_id, Some(id));
        }
    }
    assert!(saw_terminated);
}

struct RacyFactory;

#[async_trait]
impl DriverFactory for RacyFactory {
    async fn launch(
        &self,
        _config: &SessionConfig,
        _events: &EventBus,
        _correlation: &CorrelationId,
    ) -> anyhow::Result<Box<dyn BrowserBackend>> {
        let backend = StubBackend::new();
        // One handle whose pipe is already half torn down.
        backend.track_handle(BrokenPipeHandle::new());
        Ok(Box::new(backend))
    }
}

#[tokio::test]
async fn half_closed_pipe_is_survived_and_reported() {
    let events = EventBus::default();
    let mut warnings = events.subscribe_to(&[EventType::SessionCleanupPipeClosedRace]);
    let state_dir = tempfile::tempdir().expect("state dir");
    let manager = SessionManager::new(
        ManagerConfig::default(),
        Arc::new(Scheduler::new(4)),
        Arc::new(RacyFactory),
        Arc::new(FsStateStore::new(state_dir.path(), events.clone())),
        events.clone(),
    );

    let session = manager.create_session(None).await.expect("create");
    let id = session.id();
    let handles = session.subprocess_handles();

    let started = std::time::Instant::now();
    assert!(manager.terminate(id).await, "terminate reports success");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "termination stayed inside its budget"
    );
    assert_eq!(session.status(), SessionStatus::Terminated);
    assert!(handles.iter().all(|h| h.is_closed()));

    let warned = warnings.try_recv().expect("recv").expect("event");
    assert_eq!(warned.event_type, EventType::SessionCleanupPipeClosedRace);
    assert_eq!(warned.session_id, Some(id));
}

#[tokio::test]
async fn concurrent_sessions_capture_distinct_snapshots_without_leaks() {
    let harness = Harness::new();
    let snapshots_dir = tempfile::tempdir().expect("snapshots dir");
    let snapshots = Arc::new(SnapshotManager::new(
        snapshots_dir.path(),
        GatingTable::default(),
        Arc::clone(&harness.scheduler),
        harness.events.clone(),
    ));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let manager = Arc::clone(&harness.manager);
        let snapshots = Arc::clone(&snapshots);
        let config = harness.session_config();
        tasks.push(tokio::spawn(async move {
            let session = manager.create_session(Some(config)).await.expect("create");
            let ctx = manager
                .create_context(session.id())
                .await
                .expect("context");
            ctx.navigate("{search_stub}", WaitStrategy::Load, Duration::from_secs(5))
                .await
                .expect("navigate");
            let manifest = snapshots.capture(&ctx, "page").await.expect("capture");
            let handles = session.subprocess_handles();
            assert!(manager.terminate(session.id()).await);
            (manifest.snapshot_id, handles)
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for task in tasks {
        let (snapshot_id, handles) = task.await.expect("task");
        assert!(ids.insert(snapshot_id), "snapshot ids must be distinct");
        assert!(handles.iter().all(|h| h.is_closed()));
    }
    assert_eq!(ids.len(), 10);
    assert_eq!(harness.manager.open_subprocess_handles(), 0);
    assert!(harness.manager.list_sessions(None).is_empty());

    // Every manifest on disk verifies.
    for id in &ids {
        let report = snapshots
            .verify(&snapshots.manifest_path(id), &CorrelationId::root())
            .await
            .expect("verify");
        assert!(report.passed(), "snapshot {id} failed verification");
    }
}

#[tokio::test]
async fn saturation_blocks_create_with_resource_exhaustion() {
    let harness = Harness::with_manager_config(ManagerConfig {
        max_concurrent_sessions: 1,
        create_timeout: Duration::from_millis(100),
        ..ManagerConfig::default()
    });

    let first = harness
        .manager
        .create_session(None)
        .await
        .expect("first session");
    let denied = harness.manager.create_session(None).await;
    assert!(matches!(denied, Err(SessionError::ResourceExhaustion(_))));

    // Terminating the first frees the slot.
    assert!(harness.manager.terminate(first.id()).await);
    let second = harness.manager.create_session(None).await;
    assert!(second.is_ok());
}

#[tokio::test]
async fn state_save_and_restore_round_trip() {
    let harness = Harness::new();
    let session = harness
        .manager
        .create_session(Some(harness.session_config()))
        .await
        .expect("create");
    let ctx = harness
        .manager
        .create_context(session.id())
        .await
        .expect("context");
    ctx.navigate("{search_stub}", WaitStrategy::Load, Duration::from_secs(5))
        .await
        .expect("navigate");
    ctx.driver()
        .set_cookies(vec![Cookie {
            name: "sid".into(),
            value: "abc123".into(),
            domain: Some("stub.local".into()),
            path: Some("/".into()),
            secure: false,
            http_only: true,
        }])
        .await
        .expect("seed cookies");

    let saved = harness
        .manager
        .save_state(session.id(), ctx.context_id(), Some("checkpoint"))
        .await
        .expect("save");
    assert_eq!(saved.state_id, "checkpoint");
    assert_eq!(saved.cookies.len(), 1);
    assert!(saved.url.ends_with("search_stub.html"));

    let loaded = harness
        .manager
        .load_state(session.id(), "checkpoint")
        .await
        .expect("load")
        .expect("state present");
    assert_eq!(loaded.cookies, saved.cookies);
    assert_eq!(loaded.schema_version, saved.schema_version);

    // Restore into a fresh context of the same session.
    let fresh = harness
        .manager
        .create_context(session.id())
        .await
        .expect("fresh context");
    assert!(
        harness
            .manager
            .restore_state(session.id(), fresh.context_id(), &loaded)
            .await
            .expect("restore")
    );
    let cookies = fresh.driver().cookies().await.expect("cookies");
    assert_eq!(cookies, saved.cookies);
    assert_eq!(fresh.current_url(), saved.url);
}

#[tokio::test]
async fn resource_pressure_reaps_the_lowest_priority_session() {
    let harness = Harness::new();
    let important = harness
        .manager
        .create_session(Some(
            SessionConfigBuilder::new()
                .test_page_root(test_pages_root())
                .priority(200)
                .build(),
        ))
        .await
        .expect("important");
    let expendable = harness
        .manager
        .create_session(Some(
            SessionConfigBuilder::new()
                .test_page_root(test_pages_root())
                .priority(10)
                .build(),
        ))
        .await
        .expect("expendable");

    let reaped = harness.manager.reap_lowest_priority().await;
    assert_eq!(reaped, Some(expendable.id()));
    assert!(harness.manager.get_session(important.id()).is_some());
    assert!(harness.manager.get_session(expendable.id()).is_none());
}

#[tokio::test]
async fn failed_sessions_become_not_found() {
    let harness = Harness::new();
    let session = harness
        .manager
        .create_session(Some(harness.session_config()))
        .await
        .expect("create");
    let id = session.id();
    let mut failures = harness.events.subscribe_to(&[EventType::SessionFailed]);

    harness.manager.mark_failed(id, "driver crashed").await;
    assert_eq!(session.status(), SessionStatus::Failed);
    assert!(harness.manager.get_session(id).is_none());
    assert!(matches!(
        harness.manager.create_context(id).await,
        Err(SessionError::NotFound(_))
    ));

    let failed = failures.try_recv().expect("recv").expect("event");
    assert_eq!(failed.event_type, EventType::SessionFailed);
    assert_eq!(failed.session_id, Some(id));
}
