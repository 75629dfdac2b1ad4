//! Chromiumoxide-backed DOM driver
//!
//! Wraps one `chromiumoxide::Page`. Element handles index into an internal
//! table because `chromiumoxide::Element` is not `Clone`; disposing a handle
//! drops the table entry. All CDP failures are mapped onto the categorized
//! [`DriverError`] so the category survives to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{CorrelationId, Event, EventBus, EventType, Severity};
use crate::selector_store::schema::{StrategySpec, WaitStrategy};

use super::kernel;
use super::{Cookie, DomDriver, DriverError, DriverResult, ElementHandle, Rect, StorageSnapshot};

const VISIBILITY_FN: &str = r"function() {
    const rect = this.getBoundingClientRect();
    const style = window.getComputedStyle(this);
    return rect.width > 0 && rect.height > 0
        && style.visibility !== 'hidden' && style.display !== 'none';
}";

const CLEAR_VALUE_FN: &str = r"function() {
    if ('value' in this) { this.value = ''; }
}";

const BOUNDING_BOX_FN: &str = r"function() {
    const r = this.getBoundingClientRect();
    return { x: r.x, y: r.y, width: r.width, height: r.height };
}";

/// Live driver bound to one Chromium tab.
pub struct ChromiumDriver {
    page: Page,
    elements: DashMap<u64, Element>,
    next_handle: AtomicU64,
    events: EventBus,
    correlation: CorrelationId,
    session_id: Uuid,
    context_id: String,
}

impl ChromiumDriver {
    #[must_use]
    pub fn new(
        page: Page,
        events: EventBus,
        correlation: CorrelationId,
        session_id: Uuid,
        context_id: String,
    ) -> Self {
        Self {
            page,
            elements: DashMap::new(),
            next_handle: AtomicU64::new(1),
            events,
            correlation,
            session_id,
            context_id,
        }
    }

    fn emit(&self, command: &str, detail: serde_json::Value) {
        self.events.publish(
            Event::new(
                EventType::DriverCommand,
                self.correlation.clone(),
                Severity::Debug,
                json!({ "command": command, "detail": detail }),
            )
            .with_session(self.session_id)
            .with_context(self.context_id.clone()),
        );
    }

    fn register(&self, element: Element) -> ElementHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.elements.insert(id, element);
        ElementHandle(id)
    }

    async fn collect_candidates(&self, strategy: &StrategySpec) -> DriverResult<Vec<Element>> {
        match strategy {
            StrategySpec::Css { selector } => {
                self.page.find_elements(selector.as_str()).await.map_err(map_cdp)
            }
            StrategySpec::Xpath { expression } => {
                self.page.find_xpaths(expression.as_str()).await.map_err(map_cdp)
            }
            StrategySpec::TextAnchor { text, tag } => {
                let scope = tag.as_deref().unwrap_or("body *");
                let elements = self.page.find_elements(scope).await.map_err(map_cdp)?;
                let mut matched = Vec::new();
                for el in elements {
                    if let Ok(Some(inner)) = el.inner_text().await
                        && kernel::text_qualifies(&inner, text)
                    {
                        matched.push(el);
                    }
                }
                Ok(matched)
            }
            StrategySpec::AttributeMatch { name, value, tag } => {
                let selector = kernel::attribute_css(tag.as_deref(), name, value);
                self.page.find_elements(selector.as_str()).await.map_err(map_cdp)
            }
            StrategySpec::Role { role, name } => {
                let selector = kernel::role_css(role);
                let elements = self.page.find_elements(selector.as_str()).await.map_err(map_cdp)?;
                let Some(wanted) = name else {
                    return Ok(elements);
                };
                let mut matched = Vec::new();
                for el in elements {
                    let label = match el.attribute("aria-label").await {
                        Ok(Some(label)) => Some(label),
                        _ => el.inner_text().await.ok().flatten(),
                    };
                    if label.is_some_and(|l| kernel::text_qualifies(&l, wanted)) {
                        matched.push(el);
                    }
                }
                Ok(matched)
            }
        }
    }
}

#[async_trait]
impl DomDriver for ChromiumDriver {
    async fn goto(&self, url: &str, wait: WaitStrategy, timeout: Duration) -> DriverResult<()> {
        self.emit("goto", json!({ "url": url, "wait": format!("{wait:?}") }));
        // Stale handles cannot survive navigation.
        self.elements.clear();

        let navigate = async {
            self.page.goto(url).await.map_err(map_cdp)?;
            match wait {
                WaitStrategy::Load | WaitStrategy::DomContent => {
                    self.page.wait_for_navigation().await.map_err(map_cdp)?;
                }
                WaitStrategy::NetworkIdle => {
                    self.page.wait_for_navigation().await.map_err(map_cdp)?;
                    // CDP has no first-class idle signal here; a settle
                    // delay after load is what the platform uses for SPAs.
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
            Ok::<(), DriverError>(())
        };

        match tokio::time::timeout(timeout, navigate).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(timeout)),
        }
    }

    async fn query_all(&self, strategy: &StrategySpec) -> DriverResult<Vec<ElementHandle>> {
        self.emit("query_all", json!({ "kind": strategy.kind() }));
        let candidates = self.collect_candidates(strategy).await?;
        Ok(candidates.into_iter().map(|el| self.register(el)).collect())
    }

    async fn wait_for(
        &self,
        strategy: &StrategySpec,
        timeout: Duration,
    ) -> DriverResult<ElementHandle> {
        self.emit("wait_for", json!({ "kind": strategy.kind() }));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(handle) = self.query_all(strategy).await?.into_iter().next() {
                return Ok(handle);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value> {
        self.emit("evaluate", json!({ "script_len": script.len() }));
        let result = self.page.evaluate(script).await.map_err(map_cdp)?;
        result
            .into_value::<serde_json::Value>()
            .map_err(|e| DriverError::Other(format!("evaluate result: {e}")))
    }

    async fn content(&self) -> DriverResult<String> {
        self.emit("content", json!({}));
        self.page.content().await.map_err(map_cdp)
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.emit("screenshot", json!({}));
        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            capture_beyond_viewport: Some(true),
            ..Default::default()
        };
        self.page.screenshot(params).await.map_err(map_cdp)
    }

    async fn click(&self, handle: ElementHandle) -> DriverResult<()> {
        self.emit("click", json!({ "handle": handle.0 }));
        match self.elements.get(&handle.0) {
            Some(el) => {
                el.click().await.map_err(map_cdp)?;
                Ok(())
            }
            None => Err(DriverError::Detached),
        }
    }

    async fn fill(&self, handle: ElementHandle, text: &str) -> DriverResult<()> {
        self.emit("fill", json!({ "handle": handle.0, "len": text.len() }));
        match self.elements.get(&handle.0) {
            Some(el) => {
                el.click().await.map_err(map_cdp)?;
                if let Err(e) = el.call_js_fn(CLEAR_VALUE_FN, false).await {
                    debug!("fill: could not clear previous value: {e}");
                }
                el.type_str(text).await.map_err(map_cdp)?;
                Ok(())
            }
            None => Err(DriverError::Detached),
        }
    }

    async fn press(&self, handle: ElementHandle, key: &str) -> DriverResult<()> {
        self.emit("press", json!({ "handle": handle.0, "key": key }));
        match self.elements.get(&handle.0) {
            Some(el) => {
                el.press_key(key).await.map_err(map_cdp)?;
                Ok(())
            }
            None => Err(DriverError::Detached),
        }
    }

    async fn hover(&self, handle: ElementHandle) -> DriverResult<()> {
        self.emit("hover", json!({ "handle": handle.0 }));
        match self.elements.get(&handle.0) {
            Some(el) => {
                el.hover().await.map_err(map_cdp)?;
                Ok(())
            }
            None => Err(DriverError::Detached),
        }
    }

    async fn scroll_into_view(&self, handle: ElementHandle) -> DriverResult<()> {
        self.emit("scroll_into_view", json!({ "handle": handle.0 }));
        match self.elements.get(&handle.0) {
            Some(el) => {
                el.scroll_into_view().await.map_err(map_cdp)?;
                Ok(())
            }
            None => Err(DriverError::Detached),
        }
    }

    async fn attribute(&self, handle: ElementHandle, name: &str) -> DriverResult<Option<String>> {
        match self.elements.get(&handle.0) {
            Some(el) => el.attribute(name).await.map_err(map_cdp),
            None => Err(DriverError::Detached),
        }
    }

    async fn inner_text(&self, handle: ElementHandle) -> DriverResult<String> {
        match self.elements.get(&handle.0) {
            Some(el) => Ok(el.inner_text().await.map_err(map_cdp)?.unwrap_or_default()),
            None => Err(DriverError::Detached),
        }
    }

    async fn bounding_box(&self, handle: ElementHandle) -> DriverResult<Option<Rect>> {
        match self.elements.get(&handle.0) {
            Some(el) => match el.call_js_fn(BOUNDING_BOX_FN, false).await {
                Ok(ret) => {
                    let rect = ret
                        .result
                        .value
                        .and_then(|v| serde_json::from_value::<Rect>(v).ok());
                    Ok(rect)
                }
                Err(e) => {
                    debug!("bounding_box unavailable: {e}");
                    Ok(None)
                }
            },
            None => Err(DriverError::Detached),
        }
    }

    async fn is_visible(&self, handle: ElementHandle) -> DriverResult<bool> {
        match self.elements.get(&handle.0) {
            Some(el) => match el.call_js_fn(VISIBILITY_FN, false).await {
                Ok(ret) => Ok(ret
                    .result
                    .value
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)),
                Err(e) => {
                    debug!("visibility probe failed, treating as hidden: {e}");
                    Ok(false)
                }
            },
            None => Err(DriverError::Detached),
        }
    }

    async fn dispose(&self, handle: ElementHandle) -> DriverResult<()> {
        self.elements.remove(&handle.0);
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        match self.page.url().await {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Ok(String::new()),
            Err(e) => Err(map_cdp(e)),
        }
    }

    async fn title(&self) -> DriverResult<String> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(map_cdp)?
            .unwrap_or_default())
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        let raw = self.page.get_cookies().await.map_err(map_cdp)?;
        Ok(raw
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> DriverResult<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let mut builder = CookieParam::builder()
                .name(cookie.name)
                .value(cookie.value)
                .secure(cookie.secure)
                .http_only(cookie.http_only);
            if let Some(domain) = cookie.domain {
                builder = builder.domain(domain);
            }
            if let Some(path) = cookie.path {
                builder = builder.path(path);
            }
            params.push(
                builder
                    .build()
                    .map_err(|e| DriverError::Other(format!("cookie param: {e}")))?,
            );
        }
        self.page.set_cookies(params).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn storage_snapshot(&self) -> DriverResult<StorageSnapshot> {
        let script = r"(() => {
            const dump = (s) => {
                const out = {};
                for (let i = 0; i < s.length; i++) {
                    const k = s.key(i);
                    out[k] = s.getItem(k);
                }
                return out;
            };
            return { local: dump(localStorage), session: dump(sessionStorage) };
        })()";
        let value = self.evaluate(script).await?;
        serde_json::from_value(value)
            .map_err(|e| DriverError::Other(format!("storage snapshot: {e}")))
    }

    async fn restore_storage(&self, storage: StorageSnapshot) -> DriverResult<()> {
        let data = serde_json::to_string(&storage)
            .map_err(|e| DriverError::Other(format!("storage encode: {e}")))?;
        let script = format!(
            r"(() => {{
                const data = {data};
                localStorage.clear();
                for (const [k, v] of Object.entries(data.local)) localStorage.setItem(k, v);
                sessionStorage.clear();
                for (const [k, v] of Object.entries(data.session)) sessionStorage.setItem(k, v);
                return true;
            }})()"
        );
        self.evaluate(&script).await?;
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        self.emit("close", json!({}));
        self.elements.clear();
        if let Err(e) = self.page.clone().close().await {
            warn!("tab close reported error: {e}");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Map a CDP-layer failure onto the categorized driver error.
fn map_cdp(e: impl std::fmt::Display) -> DriverError {
    let text = e.to_string();
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("timeout") {
        DriverError::Timeout(Duration::from_secs(0))
    } else if lowered.contains("not found") || lowered.contains("could not find node") {
        DriverError::NotFound
    } else if lowered.contains("detached") {
        DriverError::Detached
    } else if lowered.contains("navigat") {
        DriverError::NavigationInFlight
    } else if lowered.contains("closed") || lowered.contains("crashed") {
        DriverError::Crashed(text)
    } else {
        DriverError::Other(text)
    }
}
