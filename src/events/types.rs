//! Event envelope and event type definitions
//!
//! All components publish the same envelope: a typed event name, the
//! correlation id of the originating operation, optional session/context
//! attribution, a UTC timestamp, a severity, and a free-form JSON payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::correlation::CorrelationId;

/// Severity attached to each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Typed event names; serialized as the dotted wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.terminated")]
    SessionTerminated,
    #[serde(rename = "session.failed")]
    SessionFailed,
    #[serde(rename = "session.cleanup.pipe_closed_race")]
    SessionCleanupPipeClosedRace,
    #[serde(rename = "context.created")]
    ContextCreated,
    #[serde(rename = "context.closed")]
    ContextClosed,
    #[serde(rename = "selector.resolution.completed")]
    SelectorResolutionCompleted,
    #[serde(rename = "selector.resolution.failed")]
    SelectorResolutionFailed,
    #[serde(rename = "selector.interaction.completed")]
    SelectorInteractionCompleted,
    #[serde(rename = "selector.interaction.failed")]
    SelectorInteractionFailed,
    #[serde(rename = "snapshot.captured")]
    SnapshotCaptured,
    #[serde(rename = "snapshot.persisted")]
    SnapshotPersisted,
    #[serde(rename = "snapshot.verified")]
    SnapshotVerified,
    #[serde(rename = "resource.alert")]
    ResourceAlert,
    #[serde(rename = "storage.store")]
    StorageStore,
    #[serde(rename = "storage.delete")]
    StorageDelete,
    #[serde(rename = "driver.command")]
    DriverCommand,
    #[serde(rename = "config.reload.failed")]
    ConfigReloadFailed,
}

impl EventType {
    /// The dotted wire name for this event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "session.created",
            Self::SessionTerminated => "session.terminated",
            Self::SessionFailed => "session.failed",
            Self::SessionCleanupPipeClosedRace => "session.cleanup.pipe_closed_race",
            Self::ContextCreated => "context.created",
            Self::ContextClosed => "context.closed",
            Self::SelectorResolutionCompleted => "selector.resolution.completed",
            Self::SelectorResolutionFailed => "selector.resolution.failed",
            Self::SelectorInteractionCompleted => "selector.interaction.completed",
            Self::SelectorInteractionFailed => "selector.interaction.failed",
            Self::SnapshotCaptured => "snapshot.captured",
            Self::SnapshotPersisted => "snapshot.persisted",
            Self::SnapshotVerified => "snapshot.verified",
            Self::ResourceAlert => "resource.alert",
            Self::StorageStore => "storage.store",
            Self::StorageDelete => "storage.delete",
            Self::DriverCommand => "driver.command",
            Self::ConfigReloadFailed => "config.reload.failed",
        }
    }
}

/// The common event envelope published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub correlation_id: CorrelationId,
    pub session_id: Option<Uuid>,
    pub context_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub payload: serde_json::Value,
}

impl Event {
    /// Build an event with the current timestamp and no attribution.
    #[must_use]
    pub fn new(
        event_type: EventType,
        correlation_id: CorrelationId,
        severity: Severity,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            correlation_id,
            session_id: None,
            context_id: None,
            timestamp: Utc::now(),
            severity,
            payload,
        }
    }

    /// Attribute this event to a session.
    #[must_use]
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attribute this event to a tab context.
    #[must_use]
    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }
}
