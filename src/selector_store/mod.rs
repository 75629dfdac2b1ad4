//! Semantic selector configuration store
//!
//! Owns all selector descriptors. `load` scans a directory tree, resolves
//! inheritance and templates, and builds an immutable snapshot; `swap`
//! replaces the active snapshot atomically so readers observe either the
//! fully old or the fully new configuration, never a partial mix.

pub mod errors;
pub mod parser;
pub mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{info, warn};

use crate::events::{CorrelationId, Event, EventBus, EventType, Severity};

pub use errors::ConfigError;
pub use schema::{
    ContextDefaults, SelectorDescriptor, Strategy, StrategySpec, ValidationRules, ValueType,
    WaitStrategy,
};

/// Immutable view of one fully loaded configuration tree.
#[derive(Debug)]
pub struct SelectorSnapshot {
    descriptors: HashMap<String, Arc<SelectorDescriptor>>,
    pub source_root: PathBuf,
    pub loaded_at: DateTime<Utc>,
    pub version: u64,
}

impl SelectorSnapshot {
    /// Empty snapshot used before the first load.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            descriptors: HashMap::new(),
            source_root: PathBuf::new(),
            loaded_at: Utc::now(),
            version: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Exact lookup by fully qualified name.
    #[must_use]
    pub fn get_exact(&self, semantic_name: &str) -> Option<Arc<SelectorDescriptor>> {
        self.descriptors.get(semantic_name).cloned()
    }

    /// Lookup with context-relative fallback: an unqualified (or unmatched)
    /// name is tried against the context scope and each of its ancestors,
    /// nearest scope first, before falling back to the bare name.
    #[must_use]
    pub fn get(&self, semantic_name: &str, context: Option<&str>) -> Option<Arc<SelectorDescriptor>> {
        if let Some(found) = self.get_exact(semantic_name) {
            return Some(found);
        }
        let context = context?;
        let mut segments: Vec<&str> = context.split('.').filter(|s| !s.is_empty()).collect();
        while !segments.is_empty() {
            let qualified = format!("{}.{}", segments.join("."), semantic_name);
            if let Some(found) = self.get_exact(&qualified) {
                return Some(found);
            }
            segments.pop();
        }
        None
    }

    /// All descriptor names, for diagnostics.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.keys().map(String::as_str).collect()
    }
}

/// Store handing out immutable descriptor snapshots.
///
/// The active snapshot is behind a read-optimized lock; `get` clones an
/// `Arc` and releases the lock immediately, so readers are never blocked by
/// a reload in progress.
pub struct SelectorStore {
    active: RwLock<Arc<SelectorSnapshot>>,
    events: EventBus,
}

impl SelectorStore {
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            active: RwLock::new(Arc::new(SelectorSnapshot::empty())),
            events,
        }
    }

    /// Parse and resolve a configuration tree into a snapshot.
    ///
    /// Does not touch the active snapshot; on any error the store keeps
    /// serving whatever was active before.
    pub fn load(&self, root: &Path) -> Result<SelectorSnapshot, ConfigError> {
        let started = std::time::Instant::now();
        let tree = parser::scan_tree(root)?;
        let resolved = tree.resolve_descriptors()?;
        let descriptors: HashMap<String, Arc<SelectorDescriptor>> = resolved
            .into_iter()
            .map(|(name, descriptor)| (name, Arc::new(descriptor)))
            .collect();
        let version = self.active.read().version + 1;
        info!(
            descriptors = descriptors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            root = %root.display(),
            "selector configuration loaded"
        );
        Ok(SelectorSnapshot {
            descriptors,
            source_root: root.to_path_buf(),
            loaded_at: Utc::now(),
            version,
        })
    }

    /// Load a tree and activate it in one step.
    ///
    /// On failure the active snapshot is preserved and a
    /// `config.reload.failed` event records the offending file.
    pub fn load_and_swap(&self, root: &Path) -> Result<(), ConfigError> {
        match self.load(root) {
            Ok(snapshot) => {
                self.swap(snapshot);
                Ok(())
            }
            Err(e) => {
                warn!(root = %root.display(), error = %e, "selector configuration reload failed, keeping active snapshot");
                self.events.publish(Event::new(
                    EventType::ConfigReloadFailed,
                    CorrelationId::root(),
                    Severity::Warn,
                    json!({ "root": root.display().to_string(), "error": e.to_string() }),
                ));
                Err(e)
            }
        }
    }

    /// Atomically replace the active snapshot.
    pub fn swap(&self, snapshot: SelectorSnapshot) {
        *self.active.write() = Arc::new(snapshot);
    }

    /// Current snapshot; holders keep observing it even across a swap.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SelectorSnapshot> {
        self.active.read().clone()
    }

    /// O(1) descriptor lookup on the active snapshot.
    #[must_use]
    pub fn get(&self, semantic_name: &str, context: Option<&str>) -> Option<Arc<SelectorDescriptor>> {
        self.active.read().get(semantic_name, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(names: &[&str]) -> SelectorSnapshot {
        let mut descriptors = HashMap::new();
        for name in names {
            descriptors.insert(
                (*name).to_string(),
                Arc::new(SelectorDescriptor {
                    semantic_name: (*name).to_string(),
                    description: String::new(),
                    context: name.rsplit_once('.').map_or("", |(scope, _)| scope).to_string(),
                    strategies: vec![Strategy {
                        spec: StrategySpec::Css {
                            selector: "div".into(),
                        },
                        priority: 0,
                        weight: 1.0,
                    }],
                    validation: None,
                    confidence_threshold: 0.7,
                    timeout: std::time::Duration::from_secs(10),
                    retry_count: 2,
                    page_type: None,
                    wait_strategy: WaitStrategy::Load,
                }),
            );
        }
        SelectorSnapshot {
            descriptors,
            source_root: PathBuf::new(),
            loaded_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn context_relative_lookup_prefers_nearest_scope() {
        let snapshot = snapshot_with(&["match.header.title", "match.title", "title"]);
        let hit = snapshot.get("title", Some("match.header")).expect("hit");
        assert_eq!(hit.semantic_name, "match.header.title");
        let hit = snapshot.get("title", Some("match")).expect("hit");
        assert_eq!(hit.semantic_name, "match.title");
        let hit = snapshot.get("title", None).expect("hit");
        assert_eq!(hit.semantic_name, "title");
    }

    #[test]
    fn swap_is_atomic_for_existing_holders() {
        let store = SelectorStore::new(EventBus::default());
        store.swap(snapshot_with(&["a.one"]));
        let held = store.snapshot();
        store.swap(snapshot_with(&["b.two"]));
        // The held snapshot still resolves the old world in full.
        assert!(held.get_exact("a.one").is_some());
        assert!(held.get_exact("b.two").is_none());
        // New readers see only the new world.
        assert!(store.get("b.two", None).is_some());
        assert!(store.get("a.one", None).is_none());
    }
}
