//! Resolution result and attempt types

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::driver::{DriverError, ElementHandle};
use crate::events::CorrelationId;

/// Outcome of one strategy attempt. One record exists for every strategy
/// actually tried, in the order tried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub strategy_kind: String,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Matched,
    NoMatch,
    Timeout,
    Error,
}

/// Result of resolving a semantic selector against a tab.
///
/// Exhaustion is not an error: a result with no handle, zero confidence,
/// and the full attempt list is returned so callers can inspect what was
/// tried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub semantic_name: String,
    pub element_handle: Option<ElementHandle>,
    /// Kind tag of the winning strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_used: Option<String>,
    /// Index of the winning strategy in the descriptor's fallback order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_index: Option<usize>,
    /// Confidence in `[0, 1]`; zero exactly when no handle was produced.
    pub confidence: f64,
    pub attempts: Vec<AttemptRecord>,
    pub duration_ms: u64,
    pub correlation_id: CorrelationId,
    /// Result was served from the per-context cache.
    pub cache_hit: bool,
    /// A strategy other than the first produced the winner.
    pub fallback_used: bool,
    /// DOM generation the result is valid for.
    pub dom_generation: u64,
}

impl ResolutionResult {
    #[must_use]
    pub fn resolved(&self) -> bool {
        self.element_handle.is_some()
    }
}

/// Options accepted by `resolve`.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Context scope for unqualified-name lookup.
    pub scope: Option<String>,
    /// Cooperative cancellation; checked between strategy attempts and
    /// honored inside driver waits.
    pub cancel: Option<CancellationToken>,
    /// Skip the per-context cache for this call.
    pub bypass_cache: bool,
}

/// Interaction verbs supported on a resolved element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    Click,
    Fill,
    Press,
    Hover,
    ScrollIntoView,
}

impl InteractionAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Fill => "fill",
            Self::Press => "press",
            Self::Hover => "hover",
            Self::ScrollIntoView => "scroll_into_view",
        }
    }
}

/// Selector engine error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Semantic name absent from the active configuration snapshot.
    #[error("unknown selector {0:?}")]
    UnknownSelector(String),

    /// The tab navigated while resolution was in flight; the caller should
    /// re-query against the new document.
    #[error("context invalidated by navigation during resolution")]
    ContextInvalidated,

    /// Interaction was requested on a result without a handle.
    #[error("resolution result for {0:?} carries no element handle")]
    NoCandidate(String),

    /// Operation canceled via its token.
    #[error("resolution canceled")]
    Canceled,

    /// `fill`/`press` need a payload and none was supplied.
    #[error("interaction {0:?} requires a payload")]
    MissingPayload(&'static str),

    #[error(transparent)]
    Driver(#[from] DriverError),
}
