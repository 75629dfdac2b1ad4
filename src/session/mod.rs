//! Browser session lifecycle management
//!
//! The manager owns every session in an arena-style registry; external
//! holders work with session ids and `Arc<Session>` views, never interior
//! mutable state. Termination follows a guarded multi-step sequence where
//! each step's failure is logged and swallowed so later steps always run,
//! and every tracked subprocess handle is explicitly closed.

pub mod backend;
pub mod context;
pub mod session;
pub mod state;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ManagerConfig, SessionConfig};
use crate::events::{CorrelationId, Event, EventBus, EventType, Severity};
use crate::scheduler::Scheduler;
use crate::selector_store::schema::WaitStrategy;
use crate::storage::StateStore;

pub use backend::{
    BrokenPipeHandle, BrowserBackend, ChromiumFactory, DriverFactory, StubBackend, StubFactory,
    SubprocessHandle,
};
pub use context::{resolve_navigation_url, TabContext, TEST_PAGES_ENV};
pub use session::{Session, SessionError, SessionStatus};
pub use state::{BrowserState, BROWSER_STATE_SCHEMA_VERSION};

/// Cleanup levels the resource monitor may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupLevel {
    /// Clear caches and release idle handles.
    Soft,
    /// Close the least-recently-used tab context.
    Moderate,
    /// Terminate the session.
    Aggressive,
}

/// Owns sessions: creates, persists, restores, and reaps them.
pub struct SessionManager {
    config: ManagerConfig,
    sessions: DashMap<Uuid, Arc<Session>>,
    scheduler: Arc<Scheduler>,
    factory: Arc<dyn DriverFactory>,
    store: Arc<dyn StateStore>,
    events: EventBus,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        config: ManagerConfig,
        scheduler: Arc<Scheduler>,
        factory: Arc<dyn DriverFactory>,
        store: Arc<dyn StateStore>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: DashMap::new(),
            scheduler,
            factory,
            store,
            events,
        })
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Create a session, blocking (with timeout) under backpressure.
    pub async fn create_session(
        &self,
        config: Option<SessionConfig>,
    ) -> Result<Arc<Session>, SessionError> {
        let config = config.unwrap_or_default();
        let slot = self
            .scheduler
            .acquire_session_slot(self.config.create_timeout)
            .await?;

        let session = Session::new(config, slot);
        let correlation = session.correlation().clone();
        self.sessions.insert(session.id(), Arc::clone(&session));

        match self
            .factory
            .launch(session.config(), &self.events, &correlation)
            .await
        {
            Ok(launched) => {
                *session.subprocess_handles.lock() = launched.subprocess_handles();
                *session.backend.lock().await = Some(launched);
                session.transition_to(SessionStatus::Active);
                info!(session_id = %session.id(), "session created");
                self.emit(
                    EventType::SessionCreated,
                    &correlation,
                    Severity::Info,
                    session.id(),
                    json!({
                        "label": session.config().label,
                        "headless": session.config().headless,
                    }),
                );
                Ok(session)
            }
            Err(e) => {
                error!(session_id = %session.id(), error = %e, "session creation failed");
                self.sessions.remove(&session.id());
                self.scheduler.release_session(session.id());
                Err(SessionError::Creation(e.to_string()))
            }
        }
    }

    /// Open a new tab context inside a session.
    pub async fn create_context(
        &self,
        session_id: Uuid,
    ) -> Result<Arc<TabContext>, SessionError> {
        let session = self.live_session(session_id)?;
        match session.status() {
            SessionStatus::Active => {}
            SessionStatus::Closing => return Err(SessionError::Closing(session_id)),
            _ => return Err(SessionError::NotFound(session_id)),
        }

        let context_id = format!("ctx-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let correlation = session.correlation().child();
        let backend = session.backend.lock().await;
        let driver = backend
            .as_ref()
            .ok_or(SessionError::NotFound(session_id))?
            .new_tab(
                session_id,
                context_id.clone(),
                correlation.clone(),
                self.events.clone(),
            )
            .await
            .map_err(|e| SessionError::Creation(e.to_string()))?;
        drop(backend);

        let ctx = TabContext::new(
            context_id.clone(),
            session_id,
            correlation,
            driver,
            session.config().test_page_root.clone(),
            self.events.clone(),
        );
        session.contexts.insert(context_id, Arc::clone(&ctx));
        session.touch();
        Ok(ctx)
    }

    /// Close one tab context.
    pub async fn close_context(&self, session_id: Uuid, context_id: &str) -> Result<(), SessionError> {
        let session = self.live_session(session_id)?;
        let Some((_, ctx)) = session.contexts.remove(context_id) else {
            return Ok(());
        };
        if let Err(e) = ctx.driver().close().await {
            debug!(context_id, "context close reported: {e}");
        }
        ctx.emit_closed();
        Ok(())
    }

    /// Look up a session that has not reached a terminal state.
    #[must_use]
    pub fn get_session(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions
            .get(&session_id)
            .map(|s| s.clone())
            .filter(|s| !s.status().is_terminal())
    }

    /// All registered sessions, optionally filtered by status.
    #[must_use]
    pub fn list_sessions(&self, filter: Option<SessionStatus>) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|s| s.clone())
            .filter(|s| filter.is_none_or(|f| s.status() == f))
            .collect()
    }

    /// Graceful termination. Idempotent; returns whether the session was
    /// known. Bounded by the terminate budget, then falls back to force
    /// cleanup.
    pub async fn terminate(&self, session_id: Uuid) -> bool {
        let Some(session) = self.sessions.get(&session_id).map(|s| s.clone()) else {
            return false;
        };
        if session.status() == SessionStatus::Terminated {
            self.finish_termination(&session).await;
            return true;
        }

        let graceful = tokio::time::timeout(
            self.config.terminate_budget,
            self.graceful_shutdown(&session),
        )
        .await;
        if graceful.is_err() {
            warn!(
                session_id = %session_id,
                budget_ms = self.config.terminate_budget.as_millis() as u64,
                "graceful termination overran its budget, forcing cleanup"
            );
            return self.force_cleanup(session_id).await;
        }
        self.finish_termination(&session).await;
        true
    }

    /// Hard cleanup: close everything without waiting for the driver to be
    /// polite. Still guarded step by step.
    pub async fn force_cleanup(&self, session_id: Uuid) -> bool {
        let Some(session) = self.sessions.get(&session_id).map(|s| s.clone()) else {
            return false;
        };
        session.transition_to(SessionStatus::Closing);

        for ctx in session.contexts() {
            session.contexts.remove(ctx.context_id());
            ctx.emit_closed();
        }
        self.close_subprocess_handles(&session).await;
        // Dropping the backend tears down whatever is left (profile dir).
        *session.backend.lock().await = None;

        session.transition_to(SessionStatus::Terminated);
        self.finish_termination(&session).await;
        true
    }

    /// Flip a session to `failed` after an irrecoverable driver error,
    /// attempt best-effort cleanup, and emit `session.failed`. Subsequent
    /// calls against the id see `SessionNotFound`.
    pub async fn mark_failed(&self, session_id: Uuid, reason: &str) {
        let Some(session) = self.sessions.get(&session_id).map(|s| s.clone()) else {
            return;
        };
        warn!(session_id = %session_id, reason, "session failed");
        session.transition_to(SessionStatus::Failed);
        self.emit(
            EventType::SessionFailed,
            session.correlation(),
            Severity::Error,
            session_id,
            json!({ "reason": reason }),
        );
        for ctx in session.contexts() {
            session.contexts.remove(ctx.context_id());
            ctx.emit_closed();
        }
        self.close_subprocess_handles(&session).await;
        *session.backend.lock().await = None;
        session.slot.lock().take();
        self.scheduler.release_session(session_id);
        self.sessions.remove(&session_id);
    }

    /// Persist one tab context's state under `(session_id, state_id)`.
    pub async fn save_state(
        &self,
        session_id: Uuid,
        context_id: &str,
        state_id: Option<&str>,
    ) -> Result<BrowserState, SessionError> {
        let session = self.live_session(session_id)?;
        let ctx = session
            .context(context_id)
            .ok_or(SessionError::NotFound(session_id))?;
        let state_id = state_id.unwrap_or("latest").to_string();

        let state = BrowserState {
            schema_version: BROWSER_STATE_SCHEMA_VERSION,
            session_id,
            state_id: state_id.clone(),
            url: ctx.current_url(),
            cookies: ctx.driver().cookies().await?,
            storage: ctx.driver().storage_snapshot().await?,
            captured_at: chrono::Utc::now(),
        };

        let key = BrowserState::storage_key(session_id, &state_id);
        let value = serde_json::to_value(&state)
            .map_err(|e| SessionError::Creation(format!("state serialization: {e}")))?;
        self.store
            .store(&key, value, &ctx.correlation().child())
            .await?;
        Ok(state)
    }

    /// Load a previously saved state.
    pub async fn load_state(
        &self,
        session_id: Uuid,
        state_id: &str,
    ) -> Result<Option<BrowserState>, SessionError> {
        let key = BrowserState::storage_key(session_id, state_id);
        let Some(value) = self.store.load(&key).await? else {
            return Ok(None);
        };
        let state = serde_json::from_value(value)
            .map_err(|e| SessionError::Creation(format!("state deserialization: {e}")))?;
        Ok(Some(state))
    }

    /// Restore cookies, storage, and the final URL into a tab context.
    /// Navigation history is not replayed.
    pub async fn restore_state(
        &self,
        session_id: Uuid,
        context_id: &str,
        state: &BrowserState,
    ) -> Result<bool, SessionError> {
        let session = self.live_session(session_id)?;
        let ctx = session
            .context(context_id)
            .ok_or(SessionError::NotFound(session_id))?;

        ctx.driver().set_cookies(state.cookies.clone()).await?;
        ctx.driver().restore_storage(state.storage.clone()).await?;
        if !state.url.is_empty() && state.url != "about:blank" {
            ctx.navigate(
                &state.url,
                WaitStrategy::Load,
                session.config().page_load_timeout,
            )
            .await?;
        }
        Ok(true)
    }

    /// Apply a monitor-requested cleanup level to one session.
    pub async fn apply_cleanup(&self, session_id: Uuid, level: CleanupLevel) {
        match level {
            CleanupLevel::Soft => {
                if let Some(session) = self.get_session(session_id) {
                    for ctx in session.contexts() {
                        ctx.cache().clear();
                    }
                    debug!(session_id = %session_id, "soft cleanup: caches cleared");
                }
            }
            CleanupLevel::Moderate => {
                if let Some(session) = self.get_session(session_id)
                    && let Some(lru) = session.lru_context()
                {
                    let _ = self.close_context(session_id, lru.context_id()).await;
                    debug!(session_id = %session_id, "moderate cleanup: closed LRU context");
                }
            }
            CleanupLevel::Aggressive => {
                self.terminate(session_id).await;
            }
        }
    }

    /// On critical pressure, terminate the lowest-priority session
    /// (tie-break: oldest last activity). Returns the reaped id.
    pub async fn reap_lowest_priority(&self) -> Option<Uuid> {
        let victim = self
            .list_sessions(Some(SessionStatus::Active))
            .into_iter()
            .min_by_key(|s| (s.config().priority, s.last_activity()))?;
        let id = victim.id();
        warn!(session_id = %id, priority = victim.config().priority, "reaping session under resource pressure");
        self.terminate(id).await;
        Some(id)
    }

    /// Count of tracked subprocess handles not yet closed, across all
    /// sessions. Zero after all terminations; the leak check used in tests.
    #[must_use]
    pub fn open_subprocess_handles(&self) -> usize {
        self.sessions
            .iter()
            .flat_map(|s| s.subprocess_handles())
            .filter(|h| !h.is_closed())
            .count()
    }

    fn live_session(&self, session_id: Uuid) -> Result<Arc<Session>, SessionError> {
        self.get_session(session_id)
            .ok_or(SessionError::NotFound(session_id))
    }

    /// The guarded termination sequence. Every step catches and logs its
    /// own errors so the next step always runs.
    async fn graceful_shutdown(&self, session: &Arc<Session>) {
        // Step 1: refuse new operations.
        if !session.transition_to(SessionStatus::Closing) {
            debug!(session_id = %session.id(), status = ?session.status(), "termination on non-closable state");
        }

        // Step 2: persist and close each context.
        for ctx in session.contexts() {
            if session.config().auto_persist_state {
                if let Err(e) = self
                    .save_state_for_termination(session, &ctx)
                    .await
                {
                    warn!(
                        session_id = %session.id(),
                        context_id = ctx.context_id(),
                        "state persistence during termination failed: {e}"
                    );
                }
            }
            if let Err(e) = ctx.driver().close().await {
                warn!(context_id = ctx.context_id(), "context close during termination: {e}");
            }
            session.contexts.remove(ctx.context_id());
            ctx.emit_closed();
        }

        // Step 3: close the driver connection.
        if let Some(backend) = session.backend.lock().await.as_ref() {
            if let Err(e) = backend.close().await {
                warn!(session_id = %session.id(), "backend close during termination: {e}");
            }
        }

        // Step 4: explicitly close every tracked subprocess handle.
        self.close_subprocess_handles(session).await;

        // Step 5: release the backend and mark terminated.
        *session.backend.lock().await = None;
        session.transition_to(SessionStatus::Terminated);
    }

    /// Close tracked handles, tolerating pipes that the host runtime
    /// already tore down.
    async fn close_subprocess_handles(&self, session: &Arc<Session>) {
        let handles = session.subprocess_handles();
        for handle in handles {
            if let Err(e) = handle.close().await {
                let text = e.to_string().to_ascii_lowercase();
                if text.contains("pipe") || text.contains("closed") || text.contains("channel") {
                    warn!(
                        session_id = %session.id(),
                        handle = handle.describe(),
                        "subprocess channel already closed during cleanup: {e}"
                    );
                    self.emit(
                        EventType::SessionCleanupPipeClosedRace,
                        session.correlation(),
                        Severity::Warn,
                        session.id(),
                        json!({ "handle": handle.describe(), "error": e.to_string() }),
                    );
                } else {
                    warn!(
                        session_id = %session.id(),
                        handle = handle.describe(),
                        "subprocess handle close failed: {e}"
                    );
                }
            }
        }
    }

    async fn save_state_for_termination(
        &self,
        session: &Arc<Session>,
        ctx: &Arc<TabContext>,
    ) -> Result<(), SessionError> {
        let state = BrowserState {
            schema_version: BROWSER_STATE_SCHEMA_VERSION,
            session_id: session.id(),
            state_id: ctx.context_id().to_string(),
            url: ctx.current_url(),
            cookies: ctx.driver().cookies().await?,
            storage: ctx.driver().storage_snapshot().await?,
            captured_at: chrono::Utc::now(),
        };
        let key = BrowserState::storage_key(session.id(), ctx.context_id());
        let value = serde_json::to_value(&state)
            .map_err(|e| SessionError::Creation(format!("state serialization: {e}")))?;
        self.store
            .store(&key, value, &ctx.correlation().child())
            .await?;
        Ok(())
    }

    /// Final bookkeeping shared by all termination paths.
    async fn finish_termination(&self, session: &Arc<Session>) {
        session.slot.lock().take();
        self.scheduler.release_session(session.id());
        if self.sessions.remove(&session.id()).is_some() {
            info!(session_id = %session.id(), "session terminated");
            self.emit(
                EventType::SessionTerminated,
                session.correlation(),
                Severity::Info,
                session.id(),
                json!({ "contexts_remaining": session.context_count() }),
            );
        }
    }

    fn emit(
        &self,
        event_type: EventType,
        correlation: &CorrelationId,
        severity: Severity,
        session_id: Uuid,
        payload: serde_json::Value,
    ) {
        self.events.publish(
            Event::new(event_type, correlation.clone(), severity, payload)
                .with_session(session_id),
        );
    }
}
