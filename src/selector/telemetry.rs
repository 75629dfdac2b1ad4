//! In-process selector resolution telemetry
//!
//! Aggregates per semantic name: totals, successes, cache hits, per-strategy
//! success counts, and a rolling latency window exposed as p50/p95/p99.

use std::collections::{HashMap, VecDeque};

use dashmap::DashMap;
use serde::Serialize;

const LATENCY_WINDOW: usize = 512;

#[derive(Debug, Default)]
struct SelectorStats {
    total: u64,
    successes: u64,
    cache_hits: u64,
    per_strategy: HashMap<String, u64>,
    latencies_ms: VecDeque<u64>,
}

/// Consistent view of one selector's counters.
#[derive(Debug, Clone, Serialize)]
pub struct SelectorStatsSnapshot {
    pub semantic_name: String,
    pub total: u64,
    pub successes: u64,
    pub cache_hits: u64,
    pub per_strategy: HashMap<String, u64>,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Lock-striped telemetry registry, shared by clone.
#[derive(Debug, Default)]
pub struct SelectorTelemetry {
    stats: DashMap<String, SelectorStats>,
}

impl SelectorTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        semantic_name: &str,
        strategy_used: Option<&str>,
        cache_hit: bool,
        duration_ms: u64,
    ) {
        let mut entry = self.stats.entry(semantic_name.to_string()).or_default();
        entry.total += 1;
        if let Some(kind) = strategy_used {
            entry.successes += 1;
            *entry.per_strategy.entry(kind.to_string()).or_default() += 1;
        }
        if cache_hit {
            entry.cache_hits += 1;
        }
        if entry.latencies_ms.len() == LATENCY_WINDOW {
            entry.latencies_ms.pop_front();
        }
        entry.latencies_ms.push_back(duration_ms);
    }

    #[must_use]
    pub fn snapshot(&self, semantic_name: &str) -> Option<SelectorStatsSnapshot> {
        let entry = self.stats.get(semantic_name)?;
        let mut sorted: Vec<u64> = entry.latencies_ms.iter().copied().collect();
        sorted.sort_unstable();
        Some(SelectorStatsSnapshot {
            semantic_name: semantic_name.to_string(),
            total: entry.total,
            successes: entry.successes,
            cache_hits: entry.cache_hits,
            per_strategy: entry.per_strategy.clone(),
            p50_ms: percentile(&sorted, 50),
            p95_ms: percentile(&sorted, 95),
            p99_ms: percentile(&sorted, 99),
        })
    }

    /// Snapshot every tracked selector.
    #[must_use]
    pub fn all(&self) -> Vec<SelectorStatsSnapshot> {
        // Collect keys first: looking up entries while iterating the same
        // shard would deadlock.
        let names: Vec<String> = self.stats.iter().map(|e| e.key().clone()).collect();
        names.iter().filter_map(|name| self.snapshot(name)).collect()
    }
}

fn percentile(sorted: &[u64], pct: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * sorted.len()).div_ceil(100);
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}
