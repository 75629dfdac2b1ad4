//! Event bus for publishing and subscribing to platform events
//!
//! Built on a broadcast channel: publish never blocks the publisher, each
//! subscriber consumes at its own pace, and a subscriber that falls behind
//! loses its own oldest events without affecting anyone else.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::metrics::EventBusMetrics;
use super::subscriber::EventSubscriber;
use super::types::{Event, EventType};

/// Default ring capacity per bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Pub/sub bus carrying [`Event`] envelopes.
///
/// Cloning is cheap; all clones share the same channel and metrics.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    metrics: EventBusMetrics,
    capacity: usize,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            metrics: EventBusMetrics::new(),
            capacity,
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Never blocks and never fails: an event published with no subscribers
    /// is counted as unobserved and discarded. Returns the number of
    /// subscribers that will observe the event.
    pub fn publish(&self, event: Event) -> usize {
        log::trace!(
            "publish {} [{}]",
            event.event_type.as_str(),
            event.correlation_id
        );
        match self.sender.send(event) {
            Ok(subscriber_count) => {
                self.metrics.increment_published();
                self.metrics.update_subscriber_count(subscriber_count);
                subscriber_count
            }
            Err(_) => {
                self.metrics.increment_published();
                self.metrics.increment_unobserved();
                0
            }
        }
    }

    /// Subscribe to all events.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber::new(self.sender.subscribe(), None)
    }

    /// Subscribe to a fixed set of event types.
    ///
    /// The filter is installed at subscription time and evaluated in the
    /// delivery path, before the subscriber observes the event.
    #[must_use]
    pub fn subscribe_to(&self, types: &[EventType]) -> EventSubscriber {
        let allowed: Arc<[EventType]> = Arc::from(types.to_vec());
        EventSubscriber::new(
            self.sender.subscribe(),
            Some(Box::new(move |t| allowed.contains(t))),
        )
    }

    /// Subscribe with an arbitrary event-type predicate.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, filter: F) -> EventSubscriber
    where
        F: Fn(&EventType) -> bool + Send + Sync + 'static,
    {
        EventSubscriber::new(self.sender.subscribe(), Some(Box::new(filter)))
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let count = self.sender.receiver_count();
        self.metrics.update_subscriber_count(count);
        count
    }

    #[must_use]
    pub fn metrics(&self) -> &EventBusMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
