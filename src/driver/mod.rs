//! DOM driver facade
//!
//! Thin capability surface over the concrete browser controller. One driver
//! instance is bound to one tab; the selector engine and snapshot manager
//! talk only to this trait, never to the browser crate directly. This is the
//! only layer permitted to touch the browser, and it is mockable: the
//! [`StubDriver`] serves parsed stub pages with no browser at all.

pub mod chromium;
pub mod kernel;
pub mod stub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::selector_store::schema::{StrategySpec, WaitStrategy};

pub use chromium::ChromiumDriver;
pub use stub::StubDriver;

/// Opaque handle to a located element.
///
/// Handles index into the owning driver's element table; they are only
/// meaningful for the driver that produced them and become stale once the
/// tab navigates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(pub u64);

/// Bounding box of an element in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Categorized driver failure. The category must survive to the caller;
/// wrapping a driver error in something generic loses the contract.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("element not found")]
    NotFound,
    #[error("driver operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("element handle is detached")]
    Detached,
    #[error("navigation in flight")]
    NavigationInFlight,
    #[error("browser crashed: {0}")]
    Crashed(String),
    #[error("driver error: {0}")]
    Other(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Capability surface over one browser tab.
///
/// Every method may suspend; implementations emit a `driver.command` event
/// per call, tagged with the tab's correlation id.
#[async_trait]
pub trait DomDriver: Send + Sync {
    /// Navigate the tab and wait according to the given strategy.
    async fn goto(&self, url: &str, wait: WaitStrategy, timeout: Duration) -> DriverResult<()>;

    /// Locate every element matching the strategy.
    async fn query_all(&self, strategy: &StrategySpec) -> DriverResult<Vec<ElementHandle>>;

    /// Locate the first element matching the strategy, if any.
    async fn query_one(&self, strategy: &StrategySpec) -> DriverResult<Option<ElementHandle>> {
        Ok(self.query_all(strategy).await?.into_iter().next())
    }

    /// Poll until the strategy matches or the timeout elapses.
    async fn wait_for(
        &self,
        strategy: &StrategySpec,
        timeout: Duration,
    ) -> DriverResult<ElementHandle>;

    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value>;

    /// Full serialized HTML of the page.
    async fn content(&self) -> DriverResult<String>;

    /// PNG screenshot of the page.
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    async fn click(&self, handle: ElementHandle) -> DriverResult<()>;

    async fn fill(&self, handle: ElementHandle, text: &str) -> DriverResult<()>;

    async fn press(&self, handle: ElementHandle, key: &str) -> DriverResult<()>;

    async fn hover(&self, handle: ElementHandle) -> DriverResult<()>;

    async fn scroll_into_view(&self, handle: ElementHandle) -> DriverResult<()>;

    async fn attribute(&self, handle: ElementHandle, name: &str) -> DriverResult<Option<String>>;

    async fn inner_text(&self, handle: ElementHandle) -> DriverResult<String>;

    async fn bounding_box(&self, handle: ElementHandle) -> DriverResult<Option<Rect>>;

    async fn is_visible(&self, handle: ElementHandle) -> DriverResult<bool>;

    /// Release a handle; further use returns [`DriverError::Detached`].
    async fn dispose(&self, handle: ElementHandle) -> DriverResult<()>;

    /// URL the tab currently points at.
    async fn current_url(&self) -> DriverResult<String>;

    /// Document title, empty when the page has none.
    async fn title(&self) -> DriverResult<String>;

    /// Cookies for the current page, as name/value pairs with metadata.
    async fn cookies(&self) -> DriverResult<Vec<Cookie>>;

    /// Install cookies into the tab.
    async fn set_cookies(&self, cookies: Vec<Cookie>) -> DriverResult<()>;

    /// Read local and session storage for state persistence.
    async fn storage_snapshot(&self) -> DriverResult<StorageSnapshot>;

    /// Write local and session storage from a saved state.
    async fn restore_storage(&self, storage: StorageSnapshot) -> DriverResult<()>;

    /// Close the tab.
    async fn close(&self) -> DriverResult<()>;

    /// Concrete-type access, mainly for tests driving the stub backend.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Web storage contents carried through state save/restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub local: std::collections::HashMap<String, String>,
    pub session: std::collections::HashMap<String, String>,
}

/// Cookie record carried through state save/restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}
