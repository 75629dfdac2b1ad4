//! Builder for session configuration

use std::path::PathBuf;
use std::time::Duration;

use super::types::{ProxySettings, SessionConfig, StealthSettings, ViewportSettings};

/// Fluent builder over [`SessionConfig`].
///
/// ```
/// use pagescout::config::SessionConfigBuilder;
///
/// let config = SessionConfigBuilder::new()
///     .headless(true)
///     .viewport(1280, 720)
///     .memory_budget_mb(1024)
///     .label("flashscore-worker")
///     .build();
/// assert_eq!(config.viewport.width, 1280);
/// ```
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    #[must_use]
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport = ViewportSettings {
            width,
            height,
            ..self.config.viewport
        };
        self
    }

    #[must_use]
    pub fn stealth(mut self, stealth: StealthSettings) -> Self {
        self.config.stealth = stealth;
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn auto_persist_state(mut self, enabled: bool) -> Self {
        self.config.auto_persist_state = enabled;
        self
    }

    #[must_use]
    pub fn memory_budget_mb(mut self, budget: u64) -> Self {
        self.config.memory_budget_mb = budget;
        self
    }

    #[must_use]
    pub fn page_load_timeout(mut self, timeout: Duration) -> Self {
        self.config.page_load_timeout = timeout;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: u8) -> Self {
        self.config.priority = priority;
        self
    }

    #[must_use]
    pub fn test_page_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.test_page_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}
