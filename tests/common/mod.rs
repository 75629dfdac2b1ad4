//! Shared fixtures for integration tests
//!
//! Everything runs offline: sessions use the stub factory, navigation
//! resolves `{name}` targets to the stub pages under `testdata/pages`, and
//! state lands in per-test temp directories.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use pagescout::config::{ManagerConfig, SessionConfigBuilder};
use pagescout::events::EventBus;
use pagescout::scheduler::Scheduler;
use pagescout::selector_store::SelectorStore;
use pagescout::session::{SessionManager, StubFactory, TabContext};
use pagescout::storage::FsStateStore;
use pagescout::{SelectorEngine, SessionConfig, StubDriver};

/// Root of the stub pages shipped with the crate.
pub fn test_pages_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("pages")
}

/// A full offline harness: manager + store + engine over one bus.
pub struct Harness {
    pub events: EventBus,
    pub scheduler: Arc<Scheduler>,
    pub manager: Arc<SessionManager>,
    pub selector_store: Arc<SelectorStore>,
    pub engine: Arc<SelectorEngine>,
    pub state_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_manager_config(ManagerConfig::default())
    }

    pub fn with_manager_config(config: ManagerConfig) -> Self {
        let events = EventBus::default();
        let scheduler = Arc::new(Scheduler::new(config.max_concurrent_sessions));
        let state_dir = tempfile::tempdir().expect("state dir");
        let store = Arc::new(FsStateStore::new(state_dir.path(), events.clone()));
        let manager = SessionManager::new(
            config,
            Arc::clone(&scheduler),
            Arc::new(StubFactory),
            store,
            events.clone(),
        );
        let selector_store = Arc::new(SelectorStore::new(events.clone()));
        let engine = Arc::new(SelectorEngine::new(
            Arc::clone(&selector_store),
            events.clone(),
        ));
        Self {
            events,
            scheduler,
            manager,
            selector_store,
            engine,
            state_dir,
        }
    }

    /// Default session config pointed at the stub pages.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfigBuilder::new()
            .test_page_root(test_pages_root())
            .build()
    }

    /// Create a session plus one context, already navigated to a stub page.
    pub async fn context_on(&self, stub: &str) -> (uuid::Uuid, Arc<TabContext>) {
        let session = self
            .manager
            .create_session(Some(self.session_config()))
            .await
            .expect("create session");
        let ctx = self
            .manager
            .create_context(session.id())
            .await
            .expect("create context");
        ctx.navigate(
            &format!("{{{stub}}}"),
            pagescout::WaitStrategy::Load,
            std::time::Duration::from_secs(5),
        )
        .await
        .expect("navigate to stub");
        (session.id(), ctx)
    }

    /// Load a selector configuration tree from literal (path, json) pairs
    /// and activate it.
    pub fn load_selectors(&self, files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = write_selector_tree(files);
        self.selector_store
            .load_and_swap(dir.path())
            .expect("load selectors");
        dir
    }
}

/// Materialize a selector config tree in a temp directory.
pub fn write_selector_tree(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("selector tree dir");
    for (relative, contents) in files {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(&path, contents).expect("write selector file");
    }
    dir
}

/// Reach the stub driver behind a context for direct manipulation.
pub fn stub_driver(ctx: &TabContext) -> &StubDriver {
    ctx.driver()
        .as_any()
        .downcast_ref::<StubDriver>()
        .expect("stub driver")
}
