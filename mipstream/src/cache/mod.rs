//! Bounded resident-tile cache with asynchronous loading.
//!
//! [`TileCache`] keeps at most a configured number of decoded tiles in
//! memory and fetches missing ones through a pool of async workers:
//!
//! ```text
//!   request(key, hints)                    worker pool
//!        │                                      │
//!        ▼                                      ▼
//!   ┌──────────────┐   enqueue   ┌───────────────────────────┐
//!   │ resident map │ ──────────► │ priority queue (max-heap) │
//!   │ key -> Cell  │             │ priority, then FIFO/LIFO  │
//!   └──────────────┘             └───────────────────────────┘
//!        │                                      │ pop
//!        │ LRU eviction                         ▼
//!        ▼                              source.fetch() -> fill cell
//! ```
//!
//! Each tile has at most one fetch in flight regardless of how many
//! requesters ask for it; duplicates merge into the existing job. Eviction
//! only considers cells no requester still holds. Queued (not yet started)
//! background fetches are dropped when a new frame begins; blocking
//! requests survive frame boundaries.

mod core;
mod queue;
mod stats;
mod types;
mod worker;

pub use core::TileCache;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use types::{
    CacheError, CacheHints, LoadingStrategy, TileCacheConfig, DEFAULT_MAX_RESIDENT_TILES,
    DEFAULT_WORKER_COUNT,
};
