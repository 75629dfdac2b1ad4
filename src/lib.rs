//! pagescout: browser-automation scraping core
//!
//! Three tightly coupled subsystems: a semantic selector engine that
//! resolves abstract element names against live pages, a session lifecycle
//! manager owning browsers and tab contexts with crash-safe cleanup, and a
//! snapshot pipeline whose manifests are durable before `capture` returns.
//! Every operation carries a correlation id and publishes structured
//! events on the shared bus.

pub mod browser_profile;
pub mod browser_setup;
pub mod config;
pub mod driver;
pub mod events;
pub mod monitor;
pub mod scheduler;
pub mod selector;
pub mod selector_store;
pub mod session;
pub mod snapshot;
pub mod storage;

pub use browser_profile::{cleanup_stale_profiles, create_unique_profile, BrowserProfile};
pub use browser_setup::{download_managed_browser, find_browser_executable, launch_browser};
pub use config::{
    ManagerConfig, MonitorConfig, ProxySettings, SessionConfig, SessionConfigBuilder,
    StealthSettings, ViewportSettings,
};
pub use driver::{
    ChromiumDriver, Cookie, DomDriver, DriverError, ElementHandle, Rect, StorageSnapshot,
    StubDriver,
};
pub use events::{CorrelationId, Event, EventBus, EventSubscriber, EventType, Severity};
pub use monitor::{AlertLevel, ResourceMetrics, ResourceMonitor};
pub use scheduler::{Scheduler, SchedulerError, SessionSlot};
pub use selector::{
    AttemptRecord, AttemptStatus, InteractionAction, InteractionOutcome, ResolutionResult,
    ResolveError, ResolveOptions, SelectorEngine, SelectorTelemetry,
};
pub use selector_store::{
    ConfigError, SelectorDescriptor, SelectorSnapshot, SelectorStore, Strategy, StrategySpec,
    ValidationRules, WaitStrategy,
};
pub use session::{
    BrowserState, ChromiumFactory, CleanupLevel, DriverFactory, Session, SessionError,
    SessionManager, SessionStatus, StubFactory, TabContext,
};
pub use snapshot::{
    GatingRule, GatingTable, SnapshotError, SnapshotManager, SnapshotManifest, VerifyReport,
};
pub use storage::{FsStateStore, StateStore, StorageError};
