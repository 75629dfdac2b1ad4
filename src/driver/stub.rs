//! Offline stub driver
//!
//! Serves `file://` stub pages parsed with `scraper` instead of driving a
//! browser. Queries materialize matched elements (tag, text, attributes,
//! visibility) at match time, so handle operations never re-touch the
//! document. Used by test-mode navigation (§ integration tests) and anywhere
//! a deterministic, browserless tab is needed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scraper::{Html, Selector};
use serde_json::json;
use uuid::Uuid;

use crate::events::{CorrelationId, Event, EventBus, EventType, Severity};
use crate::selector_store::schema::{StrategySpec, WaitStrategy};

use super::kernel;
use super::{Cookie, DomDriver, DriverError, DriverResult, ElementHandle, Rect, StorageSnapshot};

/// Smallest valid PNG, handed out for stub screenshots.
const STUB_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x62, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Element data captured at query time.
#[derive(Debug, Clone)]
struct StubElement {
    tag: String,
    text: String,
    attrs: HashMap<String, String>,
    visible: bool,
    value: Option<String>,
}

#[derive(Debug, Default)]
struct StubState {
    url: String,
    html: String,
    elements: HashMap<u64, StubElement>,
    next_handle: u64,
    cookies: Vec<Cookie>,
    storage: StorageSnapshot,
    crashed: bool,
    fail_screenshots: bool,
}

/// Browserless DOM driver over a parsed HTML document.
pub struct StubDriver {
    state: Mutex<StubState>,
    events: EventBus,
    correlation: CorrelationId,
    session_id: Uuid,
    context_id: String,
}

impl StubDriver {
    #[must_use]
    pub fn new(
        events: EventBus,
        correlation: CorrelationId,
        session_id: Uuid,
        context_id: String,
    ) -> Self {
        Self {
            state: Mutex::new(StubState {
                next_handle: 1,
                ..StubState::default()
            }),
            events,
            correlation,
            session_id,
            context_id,
        }
    }

    /// Replace the document directly (simulates an in-page mutation or a
    /// navigation performed behind the driver's back).
    pub fn set_html(&self, html: impl Into<String>) {
        let mut state = self.state.lock();
        state.html = html.into();
        state.elements.clear();
    }

    /// Make subsequent content/query calls fail as a crashed browser would.
    pub fn set_crashed(&self, crashed: bool) {
        self.state.lock().crashed = crashed;
    }

    /// Make screenshots fail (exercises best-effort capture paths).
    pub fn set_fail_screenshots(&self, fail: bool) {
        self.state.lock().fail_screenshots = fail;
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

    fn check_crashed(state: &StubState) -> DriverResult<()> {
        if state.crashed {
            Err(DriverError::Crashed("stub driver marked crashed".into()))
        } else {
            Ok(())
        }
    }

    /// Run a CSS query against the current document and materialize matches.
    fn select_into_state(state: &mut StubState, css: &str) -> DriverResult<Vec<ElementHandle>> {
        let selector = Selector::parse(css)
            .map_err(|e| DriverError::Other(format!("invalid selector {css:?}: {e}")))?;
        let document = Html::parse_document(&state.html);
        let mut matched = Vec::new();
        for element in document.select(&selector) {
            let attrs: HashMap<String, String> = element
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            // Hidden ancestors hide their subtree.
            let visible = element_is_visible(&attrs)
                && element
                    .ancestors()
                    .filter_map(scraper::ElementRef::wrap)
                    .all(|ancestor| {
                        let attrs: HashMap<String, String> = ancestor
                            .value()
                            .attrs()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect();
                        element_is_visible(&attrs)
                    });
            matched.push(StubElement {
                tag: element.value().name().to_string(),
                text: element.text().collect::<Vec<_>>().join(" ").trim().to_string(),
                visible,
                value: attrs.get("value").cloned(),
                attrs,
            });
        }
        let mut handles = Vec::with_capacity(matched.len());
        for el in matched {
            let id = state.next_handle;
            state.next_handle += 1;
            state.elements.insert(id, el);
            handles.push(ElementHandle(id));
        }
        Ok(handles)
    }

    fn query_into_state(
        state: &mut StubState,
        strategy: &StrategySpec,
    ) -> DriverResult<Vec<ElementHandle>> {
        match strategy {
            StrategySpec::Css { selector } => Self::select_into_state(state, selector),
            StrategySpec::Xpath { expression } => match kernel::xpath_to_css(expression) {
                Some(css) => Self::select_into_state(state, &css),
                None => Err(DriverError::Other(format!(
                    "unsupported xpath expression: {expression}"
                ))),
            },
            StrategySpec::TextAnchor { text, tag } => {
                let scope = tag.as_deref().unwrap_or("body *");
                let handles = Self::select_into_state(state, scope)?;
                Ok(Self::retain_by_text(state, handles, text))
            }
            StrategySpec::AttributeMatch { name, value, tag } => {
                let css = kernel::attribute_css(tag.as_deref(), name, value);
                Self::select_into_state(state, &css)
            }
            StrategySpec::Role { role, name } => {
                let handles = Self::select_into_state(state, &kernel::role_css(role))?;
                match name {
                    Some(wanted) => Ok(Self::retain_by_text(state, handles, wanted)),
                    None => Ok(handles),
                }
            }
        }
    }

    fn retain_by_text(
        state: &mut StubState,
        handles: Vec<ElementHandle>,
        wanted: &str,
    ) -> Vec<ElementHandle> {
        handles
            .into_iter()
            .filter(|h| {
                let keep = state.elements.get(&h.0).is_some_and(|el| {
                    let label = el.attrs.get("aria-label").cloned().unwrap_or_else(|| el.text.clone());
                    kernel::text_qualifies(&label, wanted)
                });
                if !keep {
                    state.elements.remove(&h.0);
                }
                keep
            })
            .collect()
    }

    fn with_element<T>(
        &self,
        handle: ElementHandle,
        f: impl FnOnce(&StubElement) -> T,
    ) -> DriverResult<T> {
        let state = self.state.lock();
        state
            .elements
            .get(&handle.0)
            .map(f)
            .ok_or(DriverError::Detached)
    }
}

fn element_is_visible(attrs: &HashMap<String, String>) -> bool {
    if attrs.contains_key("hidden") {
        return false;
    }
    if attrs.get("type").is_some_and(|t| t == "hidden") {
        return false;
    }
    if let Some(style) = attrs.get("style") {
        let style: String = style.chars().filter(|c| !c.is_whitespace()).collect();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return false;
        }
    }
    true
}

#[async_trait]
impl DomDriver for StubDriver {
    async fn goto(&self, url: &str, _wait: WaitStrategy, timeout: Duration) -> DriverResult<()> {
        self.emit("goto", json!({ "url": url }));
        let html = if url == "about:blank" {
            String::new()
        } else if let Some(path) = url.strip_prefix("file://") {
            tokio::time::timeout(timeout, tokio::fs::read_to_string(path))
                .await
                .map_err(|_| DriverError::Timeout(timeout))?
                .map_err(|e| DriverError::Other(format!("stub page {path}: {e}")))?
        } else {
            return Err(DriverError::Other(format!(
                "offline driver cannot fetch remote url: {url}"
            )));
        };
        let mut state = self.state.lock();
        Self::check_crashed(&state)?;
        state.url = url.to_string();
        state.html = html;
        state.elements.clear();
        Ok(())
    }

    async fn query_all(&self, strategy: &StrategySpec) -> DriverResult<Vec<ElementHandle>> {
        self.emit("query_all", json!({ "kind": strategy.kind() }));
        let mut state = self.state.lock();
        Self::check_crashed(&state)?;
        Self::query_into_state(&mut state, strategy)
    }

    async fn wait_for(
        &self,
        strategy: &StrategySpec,
        timeout: Duration,
    ) -> DriverResult<ElementHandle> {
        // The stub document never changes on its own; one query decides.
        match self.query_all(strategy).await?.into_iter().next() {
            Some(handle) => Ok(handle),
            None => Err(DriverError::Timeout(timeout)),
        }
    }

    async fn evaluate(&self, _script: &str) -> DriverResult<serde_json::Value> {
        // No script engine offline; callers treat null as "no result".
        Ok(serde_json::Value::Null)
    }

    async fn content(&self) -> DriverResult<String> {
        self.emit("content", json!({}));
        let state = self.state.lock();
        Self::check_crashed(&state)?;
        Ok(state.html.clone())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.emit("screenshot", json!({}));
        let state = self.state.lock();
        Self::check_crashed(&state)?;
        if state.fail_screenshots {
            return Err(DriverError::Other("stub screenshot failure".into()));
        }
        Ok(STUB_PNG.to_vec())
    }

    async fn click(&self, handle: ElementHandle) -> DriverResult<()> {
        self.emit("click", json!({ "handle": handle.0 }));
        self.with_element(handle, |_| ())
    }

    async fn fill(&self, handle: ElementHandle, text: &str) -> DriverResult<()> {
        self.emit("fill", json!({ "handle": handle.0, "len": text.len() }));
        let mut state = self.state.lock();
        match state.elements.get_mut(&handle.0) {
            Some(el) => {
                el.value = Some(text.to_string());
                Ok(())
            }
            None => Err(DriverError::Detached),
        }
    }

    async fn press(&self, handle: ElementHandle, key: &str) -> DriverResult<()> {
        self.emit("press", json!({ "handle": handle.0, "key": key }));
        self.with_element(handle, |_| ())
    }

    async fn hover(&self, handle: ElementHandle) -> DriverResult<()> {
        self.with_element(handle, |_| ())
    }

    async fn scroll_into_view(&self, handle: ElementHandle) -> DriverResult<()> {
        self.with_element(handle, |_| ())
    }

    async fn attribute(&self, handle: ElementHandle, name: &str) -> DriverResult<Option<String>> {
        self.with_element(handle, |el| {
            if name == "value" {
                el.value.clone().or_else(|| el.attrs.get(name).cloned())
            } else {
                el.attrs.get(name).cloned()
            }
        })
    }

    async fn inner_text(&self, handle: ElementHandle) -> DriverResult<String> {
        self.with_element(handle, |el| el.text.clone())
    }

    async fn bounding_box(&self, handle: ElementHandle) -> DriverResult<Option<Rect>> {
        self.with_element(handle, |el| {
            el.visible.then_some(Rect {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 20.0,
            })
        })
    }

    async fn is_visible(&self, handle: ElementHandle) -> DriverResult<bool> {
        self.with_element(handle, |el| el.visible)
    }

    async fn dispose(&self, handle: ElementHandle) -> DriverResult<()> {
        self.state.lock().elements.remove(&handle.0);
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.state.lock().url.clone())
    }

    async fn title(&self) -> DriverResult<String> {
        let html = {
            let state = self.state.lock();
            Self::check_crashed(&state)?;
            state.html.clone()
        };
        let document = Html::parse_document(&html);
        let selector = Selector::parse("title").expect("static selector");
        Ok(document
            .select(&selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default())
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        Ok(self.state.lock().cookies.clone())
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> DriverResult<()> {
        self.state.lock().cookies = cookies;
        Ok(())
    }

    async fn storage_snapshot(&self) -> DriverResult<StorageSnapshot> {
        Ok(self.state.lock().storage.clone())
    }

    async fn restore_storage(&self, storage: StorageSnapshot) -> DriverResult<()> {
        self.state.lock().storage = storage;
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        self.emit("close", json!({}));
        let mut state = self.state.lock();
        state.elements.clear();
        state.html.clear();
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with(html: &str) -> StubDriver {
        let driver = StubDriver::new(
            EventBus::default(),
            CorrelationId::root(),
            Uuid::new_v4(),
            "ctx-test".into(),
        );
        driver.set_html(html);
        driver
    }

    #[tokio::test]
    async fn css_query_materializes_attributes_and_text() {
        let driver = driver_with(
            r#"<html><body><input name="q" value="seed"><h1 class="primary">Alpha</h1></body></html>"#,
        );
        let handles = driver
            .query_all(&StrategySpec::Css {
                selector: "input[name=\"q\"]".into(),
            })
            .await
            .expect("query");
        assert_eq!(handles.len(), 1);
        let value = driver.attribute(handles[0], "value").await.expect("attr");
        assert_eq!(value.as_deref(), Some("seed"));

        let heads = driver
            .query_all(&StrategySpec::Css {
                selector: "h1.primary".into(),
            })
            .await
            .expect("query");
        assert_eq!(
            driver.inner_text(heads[0]).await.expect("text"),
            "Alpha".to_string()
        );
    }

    #[tokio::test]
    async fn hidden_elements_are_invisible() {
        let driver = driver_with(
            r#"<html><body><div id="a" style="display: none">x</div><div id="b">y</div></body></html>"#,
        );
        let hidden = driver
            .query_all(&StrategySpec::Css { selector: "#a".into() })
            .await
            .expect("query");
        assert!(!driver.is_visible(hidden[0]).await.expect("vis"));
        let shown = driver
            .query_all(&StrategySpec::Css { selector: "#b".into() })
            .await
            .expect("query");
        assert!(driver.is_visible(shown[0]).await.expect("vis"));
    }

    #[tokio::test]
    async fn xpath_subset_matches_by_id() {
        let driver =
            driver_with(r#"<html><body><h1 id="firstHeading">Alpha</h1></body></html>"#);
        let handles = driver
            .query_all(&StrategySpec::Xpath {
                expression: "//h1[@id='firstHeading']".into(),
            })
            .await
            .expect("query");
        assert_eq!(handles.len(), 1);
    }

    #[tokio::test]
    async fn navigation_detaches_existing_handles() {
        let driver = driver_with(r"<html><body><p>one</p></body></html>");
        let handles = driver
            .query_all(&StrategySpec::Css { selector: "p".into() })
            .await
            .expect("query");
        driver.set_html(r"<html><body><p>two</p></body></html>");
        assert!(matches!(
            driver.inner_text(handles[0]).await,
            Err(DriverError::Detached)
        ));
    }

    #[tokio::test]
    async fn crashed_driver_fails_content() {
        let driver = driver_with(r"<html><body></body></html>");
        driver.set_crashed(true);
        assert!(matches!(
            driver.content().await,
            Err(DriverError::Crashed(_))
        ));
    }
}
