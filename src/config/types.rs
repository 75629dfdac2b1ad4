//! Platform configuration types
//!
//! Settings attached to a session at creation are immutable afterwards;
//! manager/monitor settings govern the owning process.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Viewport applied to every tab of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportSettings {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

/// Stealth surface applied at browser launch. Only the launch arguments and
/// the webdriver mask; deeper evasions are a decorator outside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StealthSettings {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub mask_webdriver: bool,
}

impl Default for StealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            user_agent: None,
            mask_webdriver: true,
        }
    }
}

/// Proxy the browser routes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_list: Option<String>,
}

/// Per-session configuration; immutable once the session exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub headless: bool,
    pub viewport: ViewportSettings,
    pub stealth: StealthSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,
    /// Save tab state best-effort during graceful termination.
    pub auto_persist_state: bool,
    /// Memory budget the resource monitor classifies against.
    pub memory_budget_mb: u64,
    #[serde(with = "crate::selector_store::schema::duration_ms")]
    pub page_load_timeout: Duration,
    /// Reaping priority under resource pressure; lower goes first.
    pub priority: u8,
    /// Root directory of local stub pages; enables test-mode navigation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_page_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: ViewportSettings::default(),
            stealth: StealthSettings::default(),
            proxy: None,
            auto_persist_state: false,
            memory_budget_mb: 2048,
            page_load_timeout: Duration::from_secs(30),
            priority: 100,
            test_page_root: None,
            label: None,
        }
    }
}

/// Session manager process-level settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Global cap on concurrently active sessions.
    pub max_concurrent_sessions: usize,
    /// How long `create_session` waits for a slot when saturated.
    pub create_timeout: Duration,
    /// Upper bound on graceful termination before force cleanup takes over.
    pub terminate_budget: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 50,
            create_timeout: Duration::from_secs(2),
            terminate_budget: Duration::from_secs(5),
        }
    }
}

/// Resource monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Fraction of the session budget that raises a warning alert.
    pub warning_fraction: f64,
    /// Fraction of the session budget that raises a critical alert.
    pub critical_fraction: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            warning_fraction: 0.6,
            critical_fraction: 0.8,
        }
    }
}
