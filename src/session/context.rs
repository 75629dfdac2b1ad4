//! Tab contexts
//!
//! One browsing surface inside a session: its own URL, cookies, storage,
//! DOM generation counter, and resolution cache. Contexts are owned by
//! their session and vanish with it; holders outside the session see only
//! the context id.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::driver::{DomDriver, DriverResult};
use crate::events::{CorrelationId, Event, EventBus, EventType, Severity};
use crate::selector::cache::SelectorCache;
use crate::selector_store::schema::WaitStrategy;

/// Environment variable enabling test-mode navigation: its value is the
/// directory holding stub pages.
pub const TEST_PAGES_ENV: &str = "PAGESCOUT_TEST_PAGES";

static STUB_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{([a-z0-9_]+)\}$").expect("static regex"));

/// One tab inside a session.
pub struct TabContext {
    context_id: String,
    session_id: Uuid,
    correlation: CorrelationId,
    driver: Arc<dyn DomDriver>,
    dom_generation: AtomicU64,
    current_url: RwLock<String>,
    cache: SelectorCache,
    last_activity: RwLock<DateTime<Utc>>,
    test_page_root: Option<PathBuf>,
    events: EventBus,
}

impl TabContext {
    pub(crate) fn new(
        context_id: String,
        session_id: Uuid,
        correlation: CorrelationId,
        driver: Arc<dyn DomDriver>,
        test_page_root: Option<PathBuf>,
        events: EventBus,
    ) -> Arc<Self> {
        let ctx = Arc::new(Self {
            context_id: context_id.clone(),
            session_id,
            correlation: correlation.clone(),
            driver,
            dom_generation: AtomicU64::new(0),
            current_url: RwLock::new(String::from("about:blank")),
            cache: SelectorCache::new(),
            last_activity: RwLock::new(Utc::now()),
            test_page_root,
            events: events.clone(),
        });
        events.publish(
            Event::new(
                EventType::ContextCreated,
                correlation,
                Severity::Info,
                json!({ "context_id": context_id }),
            )
            .with_session(session_id)
            .with_context(ctx.context_id.clone()),
        );
        ctx
    }

    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn correlation(&self) -> &CorrelationId {
        &self.correlation
    }

    #[must_use]
    pub fn driver(&self) -> &Arc<dyn DomDriver> {
        &self.driver
    }

    #[must_use]
    pub fn cache(&self) -> &SelectorCache {
        &self.cache
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Monotonic counter incremented on every navigation; element-handle
    /// caches keyed by it die with the old document.
    #[must_use]
    pub fn dom_generation(&self) -> u64 {
        self.dom_generation.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn current_url(&self) -> String {
        self.current_url.read().clone()
    }

    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read()
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Utc::now();
    }

    /// Navigate the tab, bumping the DOM generation and clearing the
    /// resolution cache. `{name}` targets resolve to local stub pages when
    /// test-mode navigation is configured.
    pub async fn navigate(
        &self,
        url: &str,
        wait: WaitStrategy,
        timeout: Duration,
    ) -> DriverResult<()> {
        let resolved = resolve_navigation_url(url, self.test_page_root.as_deref());
        if resolved != url {
            debug!(from = url, to = %resolved, "test-mode navigation target resolved");
        }
        self.driver
            .goto(&resolved, wait, timeout)
            .await
            .inspect_err(|_| {
                // A failed navigation still invalidates whatever was loaded.
                self.invalidate_dom();
            })?;
        self.invalidate_dom();
        *self.current_url.write() = resolved;
        self.touch();
        Ok(())
    }

    /// Bump the generation and drop cached resolutions.
    pub fn invalidate_dom(&self) {
        self.dom_generation.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
    }

    pub(crate) fn emit_closed(&self) {
        self.events.publish(
            Event::new(
                EventType::ContextClosed,
                self.correlation.clone(),
                Severity::Info,
                json!({ "context_id": self.context_id }),
            )
            .with_session(self.session_id)
            .with_context(self.context_id.clone()),
        );
    }
}

/// Resolve a `{name}` navigation target to a `file://` stub page URL.
///
/// The stub root comes from the explicit configuration when present,
/// otherwise from `PAGESCOUT_TEST_PAGES`. Targets that are not `{name}`
/// patterns, or when no root is configured, pass through untouched; the
/// snapshot and selector contracts are identical in both modes.
#[must_use]
pub fn resolve_navigation_url(url: &str, test_page_root: Option<&Path>) -> String {
    let Some(caps) = STUB_PATTERN.captures(url.trim()) else {
        return url.to_string();
    };
    let name = &caps[1];
    let root = test_page_root
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(TEST_PAGES_ENV).ok().map(PathBuf::from));
    match root {
        Some(root) => format!("file://{}", root.join(format!("{name}.html")).display()),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_patterns_resolve_against_the_configured_root() {
        let resolved =
            resolve_navigation_url("{search_stub}", Some(Path::new("/pages")));
        assert_eq!(resolved, "file:///pages/search_stub.html");
    }

    #[test]
    fn ordinary_urls_pass_through() {
        assert_eq!(
            resolve_navigation_url("https://example.com", Some(Path::new("/pages"))),
            "https://example.com"
        );
        assert_eq!(resolve_navigation_url("{Bad-Name}", Some(Path::new("/p"))), "{Bad-Name}");
    }
}
