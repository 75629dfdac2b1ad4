//! Session type and state machine
//!
//! `initializing → active → closing → terminated`, with `failed` terminal
//! from any state. A session exclusively owns its tab contexts, its backend,
//! and the subprocess handles tracked for cleanup; none of them outlive it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::driver::DriverError;
use crate::events::CorrelationId;
use crate::scheduler::{SchedulerError, SessionSlot};
use crate::storage::StorageError;

use super::backend::{BrowserBackend, SubprocessHandle};
use super::context::TabContext;

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Active,
    Closing,
    Terminated,
    Failed,
}

impl SessionStatus {
    /// Whether the state machine permits this transition.
    #[must_use]
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::{Active, Closing, Failed, Initializing, Terminated};
        match (self, next) {
            // Failed is terminal-reachable from anywhere but itself.
            (Failed, _) => false,
            (_, Failed) => true,
            (Initializing, Active | Closing) => true,
            (Active, Active | Closing) => true,
            (Closing, Terminated) => true,
            // Idempotent termination.
            (Terminated, Terminated) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

/// Session manager error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session creation failed: {0}")]
    Creation(String),

    /// The session refuses new operations while shutting down.
    #[error("session {0} is closing")]
    Closing(Uuid),

    #[error("session {0} not found")]
    NotFound(Uuid),

    /// No capacity for another session within the configured wait.
    #[error("session capacity exhausted")]
    ResourceExhaustion(#[from] SchedulerError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// An owned browser instance plus its contexts and configuration.
pub struct Session {
    id: Uuid,
    correlation: CorrelationId,
    config: SessionConfig,
    status: RwLock<SessionStatus>,
    created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
    pub(super) contexts: DashMap<String, Arc<TabContext>>,
    pub(super) backend: tokio::sync::Mutex<Option<Box<dyn BrowserBackend>>>,
    pub(super) subprocess_handles: Mutex<Vec<Arc<dyn SubprocessHandle>>>,
    pub(super) slot: Mutex<Option<SessionSlot>>,
}

impl Session {
    pub(super) fn new(config: SessionConfig, slot: SessionSlot) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            correlation: CorrelationId::root(),
            config,
            status: RwLock::new(SessionStatus::Initializing),
            created_at: Utc::now(),
            last_activity: RwLock::new(Utc::now()),
            contexts: DashMap::new(),
            backend: tokio::sync::Mutex::new(None),
            subprocess_handles: Mutex::new(Vec::new()),
            slot: Mutex::new(Some(slot)),
        })
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn correlation(&self) -> &CorrelationId {
        &self.correlation
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read()
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Utc::now();
    }

    /// Attempt a state transition; returns whether it was legal and applied.
    pub(super) fn transition_to(&self, next: SessionStatus) -> bool {
        let mut status = self.status.write();
        if status.can_transition_to(next) {
            *status = next;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn context(&self, context_id: &str) -> Option<Arc<TabContext>> {
        self.contexts.get(context_id).map(|c| c.clone())
    }

    #[must_use]
    pub fn contexts(&self) -> Vec<Arc<TabContext>> {
        self.contexts.iter().map(|c| c.clone()).collect()
    }

    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Tracked subprocess handles (for diagnostics and leak checks).
    #[must_use]
    pub fn subprocess_handles(&self) -> Vec<Arc<dyn SubprocessHandle>> {
        self.subprocess_handles.lock().clone()
    }

    /// Marker locating the session's browser process on the host, when a
    /// live subprocess exists.
    pub async fn profile_marker(&self) -> Option<String> {
        self.backend
            .lock()
            .await
            .as_ref()
            .and_then(|b| b.profile_marker())
    }

    /// Least-recently-used context, if any.
    #[must_use]
    pub fn lru_context(&self) -> Option<Arc<TabContext>> {
        self.contexts
            .iter()
            .min_by_key(|c| c.last_activity())
            .map(|c| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions_are_enforced() {
        use SessionStatus::{Active, Closing, Failed, Initializing, Terminated};
        assert!(Initializing.can_transition_to(Active));
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Terminated));
        assert!(Active.can_transition_to(Failed));
        assert!(Initializing.can_transition_to(Failed));
        assert!(Terminated.can_transition_to(Terminated));

        assert!(!Terminated.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Active));
        assert!(!Initializing.can_transition_to(Terminated));
        assert!(!Closing.can_transition_to(Active));
    }
}
