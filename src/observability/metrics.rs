//! Operational counters for the Memory Bank engine
//!
//! - Counters only, monotonic
//! - Reset only when the owning bank is created
//! - Relaxed atomics; exact totals, no cross-counter ordering

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters owned by one `MemoryBank`
#[derive(Debug, Default)]
pub struct BankMetrics {
    reads: AtomicU64,
    writes: AtomicU64,
    conflicts: AtomicU64,
    lock_timeouts: AtomicU64,
    snapshots: AtomicU64,
    rollbacks: AtomicU64,
    resolves: AtomicU64,
    resolve_cache_hits: AtomicU64,
    resolve_cache_misses: AtomicU64,
    index_recoveries: AtomicU64,
    graph_rebuilds: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl BankMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_reads(&self) {
        bump(&self.reads);
    }

    pub fn increment_writes(&self) {
        bump(&self.writes);
    }

    pub fn increment_conflicts(&self) {
        bump(&self.conflicts);
    }

    pub fn increment_lock_timeouts(&self) {
        bump(&self.lock_timeouts);
    }

    pub fn increment_snapshots(&self) {
        bump(&self.snapshots);
    }

    pub fn increment_rollbacks(&self) {
        bump(&self.rollbacks);
    }

    pub fn increment_resolves(&self) {
        bump(&self.resolves);
    }

    /// Add cache statistics gathered during one resolution
    pub fn add_cache_stats(&self, hits: u64, misses: u64) {
        self.resolve_cache_hits.fetch_add(hits, Ordering::Relaxed);
        self.resolve_cache_misses.fetch_add(misses, Ordering::Relaxed);
    }

    pub fn increment_index_recoveries(&self) {
        bump(&self.index_recoveries);
    }

    pub fn increment_graph_rebuilds(&self) {
        bump(&self.graph_rebuilds);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            resolves: self.resolves.load(Ordering::Relaxed),
            resolve_cache_hits: self.resolve_cache_hits.load(Ordering::Relaxed),
            resolve_cache_misses: self.resolve_cache_misses.load(Ordering::Relaxed),
            index_recoveries: self.index_recoveries.load(Ordering::Relaxed),
            graph_rebuilds: self.graph_rebuilds.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub conflicts: u64,
    pub lock_timeouts: u64,
    pub snapshots: u64,
    pub rollbacks: u64,
    pub resolves: u64,
    pub resolve_cache_hits: u64,
    pub resolve_cache_misses: u64,
    pub index_recoveries: u64,
    pub graph_rebuilds: u64,
}
