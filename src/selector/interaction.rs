//! Interaction helpers on resolved elements
//!
//! Before every interaction the handle is revalidated (visibility and DOM
//! generation); an invalidated handle triggers exactly one re-resolution
//! before the action runs. Every interaction emits a
//! `selector.interaction.*` event.

use std::time::Instant;

use serde_json::json;
use tracing::debug;

use crate::events::{Event, EventType, Severity};
use crate::session::context::TabContext;

use super::types::{InteractionAction, ResolutionResult, ResolveError, ResolveOptions};
use super::SelectorEngine;

/// What happened while performing an interaction.
#[derive(Debug, Clone)]
pub struct InteractionOutcome {
    pub action: InteractionAction,
    /// The handle was stale and a fresh resolution was performed first.
    pub re_resolved: bool,
    pub duration_ms: u64,
}

impl SelectorEngine {
    /// Perform an action against a previously resolved element.
    ///
    /// `payload` carries the text for `fill` and the key for `press`; it is
    /// ignored by the other actions.
    pub async fn interact(
        &self,
        ctx: &TabContext,
        result: &ResolutionResult,
        action: InteractionAction,
        payload: Option<&str>,
    ) -> Result<InteractionOutcome, ResolveError> {
        let started = Instant::now();
        let correlation = result.correlation_id.child();

        let mut handle = result
            .element_handle
            .ok_or_else(|| ResolveError::NoCandidate(result.semantic_name.clone()))?;
        let mut re_resolved = false;

        let stale = ctx.dom_generation() != result.dom_generation
            || !ctx.driver().is_visible(handle).await.unwrap_or(false);
        if stale {
            debug!(
                selector = %result.semantic_name,
                "handle invalidated before interaction, re-resolving once"
            );
            let fresh = self
                .resolve(
                    ctx,
                    &result.semantic_name,
                    &ResolveOptions {
                        bypass_cache: true,
                        ..ResolveOptions::default()
                    },
                )
                .await?;
            handle = fresh
                .element_handle
                .ok_or_else(|| ResolveError::NoCandidate(result.semantic_name.clone()))?;
            re_resolved = true;
        }

        let performed = match action {
            InteractionAction::Click => ctx.driver().click(handle).await,
            InteractionAction::Fill => {
                let text = payload.ok_or(ResolveError::MissingPayload("fill"))?;
                ctx.driver().fill(handle, text).await
            }
            InteractionAction::Press => {
                let key = payload.ok_or(ResolveError::MissingPayload("press"))?;
                ctx.driver().press(handle, key).await
            }
            InteractionAction::Hover => ctx.driver().hover(handle).await,
            InteractionAction::ScrollIntoView => ctx.driver().scroll_into_view(handle).await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (event_type, severity, error) = match &performed {
            Ok(()) => (EventType::SelectorInteractionCompleted, Severity::Info, None),
            Err(e) => (
                EventType::SelectorInteractionFailed,
                Severity::Warn,
                Some(e.to_string()),
            ),
        };
        self.events_handle().publish(
            Event::new(
                event_type,
                correlation,
                severity,
                json!({
                    "semantic_name": result.semantic_name,
                    "action": action.as_str(),
                    "re_resolved": re_resolved,
                    "duration_ms": duration_ms,
                    "error": error,
                }),
            )
            .with_session(ctx.session_id())
            .with_context(ctx.context_id().to_string()),
        );

        performed?;
        ctx.touch();
        Ok(InteractionOutcome {
            action,
            re_resolved,
            duration_ms,
        })
    }
}
