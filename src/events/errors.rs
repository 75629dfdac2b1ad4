//! Error types for event bus operations

/// Error types for event bus operations.
///
/// Publishing never fails (an event with no subscribers is counted as
/// unobserved) and subscriber lag is absorbed into `lag_drops`, so the
/// only failure a caller can see is the bus going away.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// Event bus or receiver was closed
    #[error("Event bus shutdown")]
    Shutdown,
}
