//! Correlation ids and the platform event bus
//!
//! Every top-level operation is tagged with a correlation id; components
//! publish structured [`Event`]s that drive logging, selector telemetry,
//! lifecycle tracing, and error-context collection.

pub mod bus;
pub mod correlation;
pub mod errors;
pub mod metrics;
pub mod subscriber;
pub mod types;

pub use bus::{DEFAULT_BUS_CAPACITY, EventBus};
pub use correlation::CorrelationId;
pub use errors::EventBusError;
pub use metrics::{EventBusMetrics, MetricsSnapshot};
pub use subscriber::EventSubscriber;
pub use types::{Event, EventType, Severity};
