use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for event bus operations using lock-free atomic counters.
///
/// All counters use `Ordering::SeqCst` so snapshot reads stay coherent
/// across fields.
#[derive(Debug, Clone)]
pub struct EventBusMetrics {
    pub events_published: Arc<AtomicU64>,
    pub events_unobserved: Arc<AtomicU64>,
    pub active_subscribers: Arc<AtomicUsize>,
    pub peak_subscribers: Arc<AtomicUsize>,
}

impl EventBusMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events_published: Arc::new(AtomicU64::new(0)),
            events_unobserved: Arc::new(AtomicU64::new(0)),
            active_subscribers: Arc::new(AtomicUsize::new(0)),
            peak_subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn increment_published(&self) {
        self.events_published.fetch_add(1, Ordering::SeqCst);
    }

    /// Count an event published with nobody listening.
    pub fn increment_unobserved(&self) {
        self.events_unobserved.fetch_add(1, Ordering::SeqCst);
    }

    pub fn update_subscriber_count(&self, count: usize) {
        self.active_subscribers.store(count, Ordering::SeqCst);
        let _ = self.peak_subscribers.fetch_max(count, Ordering::SeqCst);
    }

    /// Consistent view across all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::SeqCst),
            events_unobserved: self.events_unobserved.load(Ordering::SeqCst),
            active_subscribers: self.active_subscribers.load(Ordering::SeqCst),
            peak_subscribers: self.peak_subscribers.load(Ordering::SeqCst),
        }
    }
}

impl Default for EventBusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_unobserved: u64,
    pub active_subscribers: usize,
    pub peak_subscribers: usize,
}
