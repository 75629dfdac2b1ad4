//! Platform configuration
//!
//! Session, manager, and monitor settings with serde-derived records and a
//! fluent session builder.

pub mod builder;
pub mod types;

pub use builder::SessionConfigBuilder;
pub use types::{
    ManagerConfig, MonitorConfig, ProxySettings, SessionConfig, StealthSettings, ViewportSettings,
};
