//! Correlation id generation and derivation
//!
//! Every top-level operation receives a correlation id; sub-operations derive
//! children by appending a numeric suffix (`c-1a2b3c.1`, `c-1a2b3c.1.2`).
//! Ids propagate through every event, log line, and error on the same
//! operation tree.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Correlation id for one operation tree.
///
/// Cheap to clone; the underlying string is shared. Child ids are derived
/// with [`CorrelationId::child`], which hands out sequential suffixes.
/// Serializes as its plain string form.
#[derive(Debug, Clone)]
pub struct CorrelationId {
    id: Arc<str>,
    next_child: Arc<AtomicU64>,
}

fn zero_counter() -> Arc<AtomicU64> {
    Arc::new(AtomicU64::new(1))
}

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_string(String::deserialize(deserializer)?))
    }
}

impl CorrelationId {
    /// Generate a fresh root correlation id for a top-level operation.
    #[must_use]
    pub fn root() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self {
            id: Arc::from(format!("c-{}", &uuid[..12])),
            next_child: zero_counter(),
        }
    }

    /// Wrap an externally supplied id (e.g. a caller-provided correlation).
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self {
            id: Arc::from(id.into()),
            next_child: zero_counter(),
        }
    }

    /// Derive the next child id (`{parent}.{n}`).
    ///
    /// Suffixes are sequential per parent instance; two clones of the same
    /// id share the counter, so concurrently derived children never collide.
    #[must_use]
    pub fn child(&self) -> Self {
        let n = self.next_child.fetch_add(1, Ordering::Relaxed);
        Self {
            id: Arc::from(format!("{}.{}", self.id, n)),
            next_child: zero_counter(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl PartialEq for CorrelationId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CorrelationId {}
