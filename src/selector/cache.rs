//! Per-context resolution cache
//!
//! Successful resolutions are cached per tab, keyed by semantic name and
//! stamped with the DOM generation they were resolved against. Entries for
//! a stale generation are dead on arrival; the engine additionally
//! re-checks visibility before serving a hit.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::driver::ElementHandle;

const DEFAULT_CAPACITY: usize = 64;

/// One cached resolution.
#[derive(Debug, Clone)]
pub struct CachedResolution {
    pub handle: ElementHandle,
    pub strategy_used: String,
    pub strategy_index: usize,
    pub confidence: f64,
    pub dom_generation: u64,
}

/// LRU of recent successful resolutions for one tab context.
pub struct SelectorCache {
    entries: Mutex<LruCache<String, CachedResolution>>,
}

impl SelectorCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up an entry valid for the given generation. Stale entries are
    /// evicted on sight.
    #[must_use]
    pub fn get(&self, semantic_name: &str, dom_generation: u64) -> Option<CachedResolution> {
        let mut entries = self.entries.lock();
        match entries.get(semantic_name) {
            Some(entry) if entry.dom_generation == dom_generation => Some(entry.clone()),
            Some(_) => {
                entries.pop(semantic_name);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, semantic_name: &str, entry: CachedResolution) {
        self.entries.lock().put(semantic_name.to_string(), entry);
    }

    pub fn invalidate(&self, semantic_name: &str) {
        self.entries.lock().pop(semantic_name);
    }

    /// Drop everything (e.g. on navigation or soft resource cleanup).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SelectorCache {
    fn default() -> Self {
        Self::new()
    }
}
