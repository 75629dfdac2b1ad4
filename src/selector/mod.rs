//! Semantic selector resolution engine
//!
//! Resolves abstract selector names (`match.header.home_team`) to concrete
//! element handles by trying a descriptor's strategies in priority order,
//! scoring every candidate, validating the winner, and reporting the full
//! attempt trail either way. Driver failures never abort a resolution on
//! their own; they become attempt records and the next strategy runs.

pub mod cache;
pub mod interaction;
pub mod scoring;
pub mod telemetry;
pub mod types;
pub mod validation;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, warn};

use crate::driver::{DomDriver, DriverError, ElementHandle};
use crate::events::{Event, EventBus, EventType, Severity};
use crate::selector_store::schema::{SelectorDescriptor, Strategy, StrategySpec};
use crate::selector_store::SelectorStore;
use crate::session::context::TabContext;

use cache::CachedResolution;
use scoring::CandidateSignals;

pub use interaction::InteractionOutcome;
pub use telemetry::{SelectorStatsSnapshot, SelectorTelemetry};
pub use types::{
    AttemptRecord, AttemptStatus, InteractionAction, ResolutionResult, ResolveError,
    ResolveOptions,
};

/// Hard ceiling on the per-attempt driver timeout.
const ATTEMPT_TIMEOUT_CAP: Duration = Duration::from_millis(2000);
/// Exponential backoff between retry rounds.
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_millis(2000);
/// How many candidates of one strategy are scored before picking.
const MAX_SCORED_CANDIDATES: usize = 8;

/// The resolution engine. Cheap to share; holds no per-call state.
pub struct SelectorEngine {
    store: Arc<SelectorStore>,
    events: EventBus,
    telemetry: Arc<SelectorTelemetry>,
}

impl SelectorEngine {
    #[must_use]
    pub fn new(store: Arc<SelectorStore>, events: EventBus) -> Self {
        Self {
            store,
            events,
            telemetry: Arc::new(SelectorTelemetry::new()),
        }
    }

    #[must_use]
    pub fn telemetry(&self) -> &SelectorTelemetry {
        &self.telemetry
    }

    pub(crate) fn events_handle(&self) -> &EventBus {
        &self.events
    }

    /// Resolve a semantic selector against a tab context.
    ///
    /// Exhaustion returns `Ok` with an empty handle and the complete attempt
    /// list; only unknown names, navigation races, and cancellation are
    /// errors.
    pub async fn resolve(
        &self,
        ctx: &TabContext,
        semantic_name: &str,
        options: &ResolveOptions,
    ) -> Result<ResolutionResult, ResolveError> {
        let started = Instant::now();
        let correlation = ctx.correlation().child();
        let descriptor = self
            .store
            .get(semantic_name, options.scope.as_deref())
            .ok_or_else(|| ResolveError::UnknownSelector(semantic_name.to_string()))?;

        let start_generation = ctx.dom_generation();

        if !options.bypass_cache
            && let Some(hit) = self.try_cache(ctx, &descriptor, start_generation).await
        {
            let result = ResolutionResult {
                semantic_name: descriptor.semantic_name.clone(),
                element_handle: Some(hit.handle),
                strategy_used: Some(hit.strategy_used.clone()),
                strategy_index: Some(hit.strategy_index),
                confidence: hit.confidence,
                attempts: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
                correlation_id: correlation,
                cache_hit: true,
                fallback_used: hit.strategy_index > 0,
                dom_generation: start_generation,
            };
            self.finish(ctx, &descriptor, &result);
            return Ok(result);
        }

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let attempt_timeout = descriptor.timeout.min(ATTEMPT_TIMEOUT_CAP);

        for round in 0..=descriptor.retry_count {
            if ctx.dom_generation() != start_generation {
                return Err(ResolveError::ContextInvalidated);
            }
            if round > 0 {
                let backoff = backoff_for(round);
                debug!(
                    selector = %descriptor.semantic_name,
                    round,
                    backoff_ms = backoff.as_millis() as u64,
                    "resolution retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                if ctx.dom_generation() != start_generation {
                    return Err(ResolveError::ContextInvalidated);
                }
            }

            for (index, strategy) in descriptor.strategies.iter().enumerate() {
                if let Some(cancel) = &options.cancel
                    && cancel.is_cancelled()
                {
                    return Err(ResolveError::Canceled);
                }

                let outcome = self
                    .try_strategy(ctx, &descriptor, strategy, attempt_timeout)
                    .await;
                attempts.push(outcome.record);

                let Some((handle, confidence)) = outcome.winner else {
                    continue;
                };

                if confidence >= descriptor.confidence_threshold {
                    if ctx.dom_generation() != start_generation {
                        let _ = ctx.driver().dispose(handle).await;
                        return Err(ResolveError::ContextInvalidated);
                    }
                    let result = ResolutionResult {
                        semantic_name: descriptor.semantic_name.clone(),
                        element_handle: Some(handle),
                        strategy_used: Some(strategy.spec.kind().to_string()),
                        strategy_index: Some(index),
                        confidence,
                        attempts,
                        duration_ms: started.elapsed().as_millis() as u64,
                        correlation_id: correlation,
                        cache_hit: false,
                        fallback_used: index > 0,
                        dom_generation: start_generation,
                    };
                    ctx.cache().put(
                        &descriptor.semantic_name,
                        CachedResolution {
                            handle,
                            strategy_used: strategy.spec.kind().to_string(),
                            strategy_index: index,
                            confidence,
                            dom_generation: start_generation,
                        },
                    );
                    self.finish(ctx, &descriptor, &result);
                    return Ok(result);
                }

                // Below threshold: not good enough, release and move on.
                let _ = ctx.driver().dispose(handle).await;
            }
        }

        let result = ResolutionResult {
            semantic_name: descriptor.semantic_name.clone(),
            element_handle: None,
            strategy_used: None,
            strategy_index: None,
            confidence: 0.0,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            correlation_id: correlation,
            cache_hit: false,
            fallback_used: false,
            dom_generation: start_generation,
        };
        self.finish(ctx, &descriptor, &result);
        Ok(result)
    }

    async fn try_cache(
        &self,
        ctx: &TabContext,
        descriptor: &SelectorDescriptor,
        generation: u64,
    ) -> Option<CachedResolution> {
        let hit = ctx.cache().get(&descriptor.semantic_name, generation)?;
        match ctx.driver().is_visible(hit.handle).await {
            Ok(true) => Some(hit),
            _ => {
                ctx.cache().invalidate(&descriptor.semantic_name);
                None
            }
        }
    }

    /// Run one strategy and pick its best candidate.
    async fn try_strategy(
        &self,
        ctx: &TabContext,
        descriptor: &SelectorDescriptor,
        strategy: &Strategy,
        attempt_timeout: Duration,
    ) -> StrategyOutcome {
        let kind = strategy.spec.kind();
        let t0 = Instant::now();

        let queried =
            tokio::time::timeout(attempt_timeout, ctx.driver().query_all(&strategy.spec)).await;

        let handles = match queried {
            Err(_) => {
                return StrategyOutcome::miss(kind, AttemptStatus::Timeout, None, t0);
            }
            Ok(Err(e)) => {
                let status = match &e {
                    DriverError::Timeout(_) => AttemptStatus::Timeout,
                    DriverError::NotFound => AttemptStatus::NoMatch,
                    _ => AttemptStatus::Error,
                };
                return StrategyOutcome::miss(kind, status, Some(e.to_string()), t0);
            }
            Ok(Ok(handles)) => handles,
        };

        if handles.is_empty() {
            return StrategyOutcome::miss(kind, AttemptStatus::NoMatch, None, t0);
        }

        let match_count = handles.len();
        let mut best: Option<(ElementHandle, f64)> = None;
        for (i, handle) in handles.iter().copied().enumerate() {
            if i >= MAX_SCORED_CANDIDATES {
                break;
            }
            let confidence = self
                .score_candidate(ctx.driver(), descriptor, strategy, handle, match_count)
                .await;
            let better = match best {
                Some((_, current)) => confidence > current,
                None => confidence > 0.0,
            };
            if better {
                best = Some((handle, confidence));
            }
        }

        // Release everything but the winner.
        for handle in handles {
            if best.map(|(winner, _)| winner) != Some(handle) {
                let _ = ctx.driver().dispose(handle).await;
            }
        }

        StrategyOutcome {
            record: AttemptRecord {
                strategy_kind: kind.to_string(),
                status: AttemptStatus::Matched,
                error: None,
                duration_ms: t0.elapsed().as_millis() as u64,
            },
            winner: best,
        }
    }

    async fn score_candidate(
        &self,
        driver: &Arc<dyn DomDriver>,
        descriptor: &SelectorDescriptor,
        strategy: &Strategy,
        handle: ElementHandle,
        match_count: usize,
    ) -> f64 {
        let visible = driver.is_visible(handle).await.unwrap_or(false);

        let text = match driver.inner_text(handle).await {
            Ok(text) if !text.trim().is_empty() => text,
            _ => driver
                .attribute(handle, "value")
                .await
                .ok()
                .flatten()
                .unwrap_or_default(),
        };

        let text_similarity = match &strategy.spec {
            StrategySpec::TextAnchor { text: wanted, .. } => {
                Some(crate::driver::kernel::text_similarity(&text, wanted))
            }
            StrategySpec::Role {
                name: Some(wanted), ..
            } => {
                let label = driver
                    .attribute(handle, "aria-label")
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| text.clone());
                Some(crate::driver::kernel::text_similarity(&label, wanted))
            }
            _ => None,
        };

        let validation_passed = descriptor
            .validation
            .as_ref()
            .map(|rules| validation::validate_text(&text, rules));

        scoring::score(CandidateSignals {
            weight: strategy.weight,
            match_count,
            visible,
            validation_passed,
            text_similarity,
        })
    }

    /// Emit the completion event and update telemetry.
    fn finish(&self, ctx: &TabContext, descriptor: &SelectorDescriptor, result: &ResolutionResult) {
        ctx.touch();
        self.telemetry.record(
            &descriptor.semantic_name,
            result.strategy_used.as_deref(),
            result.cache_hit,
            result.duration_ms,
        );
        let (event_type, severity) = if result.resolved() {
            (EventType::SelectorResolutionCompleted, Severity::Info)
        } else {
            warn!(
                selector = %descriptor.semantic_name,
                attempts = result.attempts.len(),
                "selector resolution exhausted all strategies"
            );
            (EventType::SelectorResolutionFailed, Severity::Warn)
        };
        self.events.publish(
            Event::new(
                event_type,
                result.correlation_id.clone(),
                severity,
                json!({
                    "semantic_name": descriptor.semantic_name,
                    "strategy_used": result.strategy_used,
                    "confidence": result.confidence,
                    "attempts_count": result.attempts.len(),
                    "duration_ms": result.duration_ms,
                    "fallback_used": result.fallback_used,
                    "cache_hit": result.cache_hit,
                }),
            )
            .with_session(ctx.session_id())
            .with_context(ctx.context_id().to_string()),
        );
    }
}

struct StrategyOutcome {
    record: AttemptRecord,
    winner: Option<(ElementHandle, f64)>,
}

impl StrategyOutcome {
    fn miss(kind: &str, status: AttemptStatus, error: Option<String>, t0: Instant) -> Self {
        Self {
            record: AttemptRecord {
                strategy_kind: kind.to_string(),
                status,
                error,
                duration_ms: t0.elapsed().as_millis() as u64,
            },
            winner: None,
        }
    }
}

fn backoff_for(round: u32) -> Duration {
    let factor = 1u32 << (round.saturating_sub(1)).min(10);
    (BACKOFF_BASE * factor).min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for(1), Duration::from_millis(100));
        assert_eq!(backoff_for(2), Duration::from_millis(200));
        assert_eq!(backoff_for(3), Duration::from_millis(400));
        assert_eq!(backoff_for(6), Duration::from_millis(2000));
        assert_eq!(backoff_for(10), Duration::from_millis(2000));
    }
}
