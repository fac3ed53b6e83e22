//! Request hints, configuration, and error types for the tile cache.

use std::fmt;

use thiserror::Error;

use crate::source::FetchError;

/// Default upper bound for resident tiles.
pub const DEFAULT_MAX_RESIDENT_TILES: usize = 1024;

/// Default number of fetch workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// How a request behaves when the tile is not resident and valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStrategy {
    /// Wait until the tile's load job completes. A fetch failure is
    /// reported as an error, and a previously failed tile is retried.
    Blocking,
    /// Schedule a background load and return immediately with whatever
    /// state the tile is in. A failed tile is not retried until the next
    /// scheduling epoch.
    Volatile,
    /// Never schedule a load; only return data that is already resident.
    DontLoad,
}

impl fmt::Display for LoadingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadingStrategy::Blocking => write!(f, "blocking"),
            LoadingStrategy::Volatile => write!(f, "volatile"),
            LoadingStrategy::DontLoad => write!(f, "dont-load"),
        }
    }
}

/// Per-request scheduling hints.
///
/// `priority` orders the fetch queue; a higher value is served earlier.
/// Within one priority, jobs run in submission order unless
/// `enqueue_to_front` is set, which makes the job jump ahead of older
/// entries of the same priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHints {
    /// Load behavior when the tile is not resident and valid.
    pub strategy: LoadingStrategy,
    /// Queue priority; higher values are served earlier.
    pub priority: i32,
    /// Enqueue ahead of older jobs of the same priority.
    pub enqueue_to_front: bool,
}

impl CacheHints {
    /// Creates hints with explicit values.
    pub fn new(strategy: LoadingStrategy, priority: i32, enqueue_to_front: bool) -> Self {
        Self {
            strategy,
            priority,
            enqueue_to_front,
        }
    }

    /// Blocking hints. The job jumps its priority bucket so the caller
    /// waits as briefly as possible.
    pub fn blocking(priority: i32) -> Self {
        Self::new(LoadingStrategy::Blocking, priority, true)
    }

    /// Background-load hints.
    pub fn volatile(priority: i32) -> Self {
        Self::new(LoadingStrategy::Volatile, priority, false)
    }

    /// Resident-data-only hints.
    pub fn dont_load() -> Self {
        Self::new(LoadingStrategy::DontLoad, 0, false)
    }
}

/// Errors reported by the tile cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The tile's load job failed.
    #[error("tile fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The request addressed a level or tile outside the pyramid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The tile is not resident and the request does not load.
    #[error("tile data not yet available")]
    NotYetAvailable,

    /// The cache has been shut down.
    #[error("cache is shutting down")]
    ShuttingDown,
}

/// Configuration for a [`crate::cache::TileCache`].
#[derive(Debug, Clone)]
pub struct TileCacheConfig {
    /// Maximum number of tiles kept resident before LRU eviction starts.
    pub max_resident_tiles: usize,
    /// Number of concurrent fetch workers.
    pub worker_count: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            max_resident_tiles: DEFAULT_MAX_RESIDENT_TILES,
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }
}

impl TileCacheConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resident tile budget.
    pub fn with_max_resident_tiles(mut self, max_resident_tiles: usize) -> Self {
        self.max_resident_tiles = max_resident_tiles;
        self
    }

    /// Sets the number of fetch workers.
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }
}
