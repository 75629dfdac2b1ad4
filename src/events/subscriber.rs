//! Subscriber handle with per-subscriber lag accounting
//!
//! A subscriber that consumes slower than the bus publishes loses its own
//! oldest events; the loss is tallied in `lag_drops` and other subscribers
//! are unaffected. Delivery order is preserved per subscriber.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use super::errors::EventBusError;
use super::types::{Event, EventType};

type TypeFilter = Box<dyn Fn(&EventType) -> bool + Send + Sync>;

/// Receiving end of an [`EventBus`](super::bus::EventBus) subscription.
pub struct EventSubscriber {
    receiver: broadcast::Receiver<Event>,
    filter: Option<TypeFilter>,
    lag_drops: Arc<AtomicU64>,
}

impl EventSubscriber {
    pub(super) fn new(receiver: broadcast::Receiver<Event>, filter: Option<TypeFilter>) -> Self {
        Self {
            receiver,
            filter,
            lag_drops: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Receive the next event passing this subscriber's filter.
    ///
    /// When the subscriber has lagged, the dropped-event count is added to
    /// `lag_drops` and reception continues from the oldest retained event;
    /// the lag is not surfaced as an error.
    pub async fn recv(&mut self) -> Result<Event, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.passes(&event.event_type) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.lag_drops.fetch_add(skipped, Ordering::Relaxed);
                    log::debug!("subscriber lagged, dropped {skipped} oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::Shutdown);
                }
            }
        }
    }

    /// Drain whatever is immediately available without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Event>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.passes(&event.event_type) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.lag_drops.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::Shutdown);
                }
            }
        }
    }

    /// Number of events this subscriber has lost to lag so far.
    #[must_use]
    pub fn lag_drops(&self) -> u64 {
        self.lag_drops.load(Ordering::Relaxed)
    }

    /// Whether an event of the given type would be delivered here.
    #[must_use]
    pub fn would_receive(&self, event_type: &EventType) -> bool {
        self.passes(event_type)
    }

    fn passes(&self, event_type: &EventType) -> bool {
        self.filter.as_ref().is_none_or(|f| f(event_type))
    }
}
