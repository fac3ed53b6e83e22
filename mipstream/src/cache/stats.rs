//! Tile cache statistics for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the cache and its workers.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Requests answered from a resident cell.
    pub hits: AtomicU64,
    /// Requests that created a new cell.
    pub misses: AtomicU64,
    /// Fetch jobs that completed with pixel data.
    pub loads_completed: AtomicU64,
    /// Fetch jobs that completed with an error.
    pub load_failures: AtomicU64,
    /// Cells dropped by LRU eviction.
    pub evictions: AtomicU64,
    /// Queued jobs dropped by frame pruning or invalidation.
    pub queue_drops: AtomicU64,
    /// Requests that had to wait for a load job.
    pub blocking_waits: AtomicU64,
}

impl CacheStats {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads_completed: self.loads_completed.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            blocking_waits: self.blocking_waits.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Requests answered from a resident cell.
    pub hits: u64,
    /// Requests that created a new cell.
    pub misses: u64,
    /// Fetch jobs that completed with pixel data.
    pub loads_completed: u64,
    /// Fetch jobs that completed with an error.
    pub load_failures: u64,
    /// Cells dropped by LRU eviction.
    pub evictions: u64,
    /// Queued jobs dropped by frame pruning or invalidation.
    pub queue_drops: u64,
    /// Requests that had to wait for a load job.
    pub blocking_waits: u64,
}

impl CacheStatsSnapshot {
    /// Hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
