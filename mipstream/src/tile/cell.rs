//! The write-once tile cell.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use tokio::sync::watch;

use crate::source::FetchError;

/// Load state of a [`Cell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// No pixel data and no scheduled load.
    Empty,
    /// A load job is queued or running for this cell.
    Loading,
    /// Pixel data is present. Terminal.
    Valid,
    /// The most recent load attempt failed. A later request may retry.
    Failed,
}

impl CellState {
    /// Returns true once pixel data is present.
    pub fn is_valid(&self) -> bool {
        matches!(self, CellState::Valid)
    }

    /// Returns true if a waiter observing this state should stop waiting.
    pub fn is_settled(&self) -> bool {
        matches!(self, CellState::Valid | CellState::Failed)
    }
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellState::Empty => write!(f, "empty"),
            CellState::Loading => write!(f, "loading"),
            CellState::Valid => write!(f, "valid"),
            CellState::Failed => write!(f, "failed"),
        }
    }
}

/// One tile's slot in the resident cache.
///
/// A cell is created empty with its geometry fixed (`dims`, `min`). Pixel
/// data arrives at most once via [`Cell::fill`]; after that the cell is
/// immutable. State changes are broadcast on a watch channel so blocking
/// requesters can await completion without polling.
///
/// Edge tiles are truncated: `dims` is the cropped extent, which may be
/// smaller than the level's nominal tile dimensions.
pub struct Cell {
    /// Extent of this tile in pixels per axis.
    dims: [u32; 3],
    /// Position of the first pixel in level coordinates.
    min: [i64; 3],
    /// State machine, watchable by blocking requesters.
    state: watch::Sender<CellState>,
    /// Packed ARGB pixels, written exactly once.
    data: OnceLock<Vec<u32>>,
    /// Error recorded by the most recent failed load.
    failure: Mutex<Option<FetchError>>,
    /// Scheduling epoch in which the recorded failure happened.
    failed_epoch: AtomicU64,
    /// Monotonic counter identifying the newest queue entry for this cell.
    /// A queued fetch whose ticket is older than this has been superseded.
    ticket: AtomicU64,
    /// Priority of the newest queue entry. Advisory; used to decide whether
    /// a later request should re-enqueue at a better position.
    queued_priority: AtomicI32,
    /// Set while a worker is actually fetching this cell's data.
    fetching: AtomicBool,
    /// Logical timestamp of the most recent access, for LRU eviction.
    last_access: AtomicU64,
}

impl Cell {
    /// Creates an empty cell covering `dims` pixels starting at `min`.
    pub(crate) fn new(dims: [u32; 3], min: [i64; 3]) -> Self {
        let (state, _) = watch::channel(CellState::Empty);
        Self {
            dims,
            min,
            state,
            data: OnceLock::new(),
            failure: Mutex::new(None),
            failed_epoch: AtomicU64::new(0),
            ticket: AtomicU64::new(0),
            queued_priority: AtomicI32::new(i32::MIN),
            fetching: AtomicBool::new(false),
            last_access: AtomicU64::new(0),
        }
    }

    /// Extent of this tile in pixels per axis.
    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    /// Position of the first pixel in level coordinates.
    pub fn min(&self) -> [i64; 3] {
        self.min
    }

    /// Number of pixels this cell holds once valid.
    pub fn num_pixels(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Current load state.
    pub fn state(&self) -> CellState {
        *self.state.borrow()
    }

    /// Returns true once pixel data is present.
    pub fn is_valid(&self) -> bool {
        self.state().is_valid()
    }

    /// Subscribes to state changes. Used by blocking requesters to await
    /// completion of the load job.
    pub fn subscribe(&self) -> watch::Receiver<CellState> {
        self.state.subscribe()
    }

    /// Packed ARGB pixel data, or `None` while the cell is not valid.
    ///
    /// Pixels are laid out x-fastest: index `(z * dims[1] + y) * dims[0] + x`.
    pub fn data(&self) -> Option<&[u32]> {
        if self.is_valid() {
            self.data.get().map(|v| v.as_slice())
        } else {
            None
        }
    }

    /// Error recorded by the most recent failed load, if any.
    pub fn failure(&self) -> Option<FetchError> {
        self.failure.lock().ok().and_then(|guard| guard.clone())
    }

    /// Scheduling epoch in which the recorded failure happened.
    pub(crate) fn failed_epoch(&self) -> u64 {
        self.failed_epoch.load(Ordering::Acquire)
    }

    /// Attempts the `Empty | Failed -> Loading` transition.
    ///
    /// Returns true if this caller won the transition and is now
    /// responsible for enqueueing exactly one fetch job. A retry from
    /// `Failed` clears the recorded failure.
    pub(crate) fn try_begin_load(&self) -> bool {
        let won = self.state.send_if_modified(|state| match *state {
            CellState::Empty | CellState::Failed => {
                *state = CellState::Loading;
                true
            }
            _ => false,
        });
        if won {
            if let Ok(mut failure) = self.failure.lock() {
                *failure = None;
            }
        }
        won
    }

    /// Forces the state to `Loading`.
    ///
    /// Used by a worker that popped a still-current queue entry after the
    /// cell was reset by frame pruning.
    pub(crate) fn mark_loading(&self) {
        self.state.send_if_modified(|state| {
            if *state == CellState::Loading {
                false
            } else {
                *state = CellState::Loading;
                true
            }
        });
    }

    /// Stores the pixel data and settles the cell as `Valid`.
    pub(crate) fn fill(&self, pixels: Vec<u32>) {
        // Only the worker holding the fetch guard fills a cell, so a second
        // set cannot happen under the protocol; keep the first pixels.
        let _ = self.data.set(pixels);
        self.state.send_replace(CellState::Valid);
    }

    /// Records a load failure in `epoch` and settles the cell as `Failed`.
    pub(crate) fn fail(&self, error: FetchError, epoch: u64) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
        self.failed_epoch.store(epoch, Ordering::Release);
        self.state.send_replace(CellState::Failed);
    }

    /// Reverts `Loading -> Empty` after the queued fetch was pruned.
    ///
    /// Has no effect in any other state, in particular once data arrived.
    pub(crate) fn reset_to_empty(&self) {
        self.state.send_if_modified(|state| {
            if *state == CellState::Loading {
                *state = CellState::Empty;
                true
            } else {
                false
            }
        });
    }

    /// Ticket of the newest queue entry for this cell.
    pub(crate) fn ticket(&self) -> u64 {
        self.ticket.load(Ordering::Acquire)
    }

    /// Issues a fresh ticket, superseding all queue entries carrying older
    /// ones. Returns the new ticket.
    pub(crate) fn bump_ticket(&self) -> u64 {
        self.ticket.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Priority recorded for the newest queue entry.
    pub(crate) fn queued_priority(&self) -> i32 {
        self.queued_priority.load(Ordering::Acquire)
    }

    /// Records the priority of a freshly enqueued fetch.
    pub(crate) fn set_queued_priority(&self, priority: i32) {
        self.queued_priority.store(priority, Ordering::Release);
    }

    /// Claims the exclusive right to fetch this cell's data.
    ///
    /// Returns false if another worker already holds the claim, in which
    /// case the caller must drop its queue entry instead of fetching.
    pub(crate) fn try_acquire_fetch(&self) -> bool {
        self.fetching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the fetch claim taken by [`Cell::try_acquire_fetch`].
    pub(crate) fn release_fetch(&self) {
        self.fetching.store(false, Ordering::Release);
    }

    /// Returns true while a worker is fetching this cell's data.
    pub(crate) fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::Acquire)
    }

    /// Records an access at the given logical timestamp.
    pub(crate) fn touch(&self, stamp: u64) {
        self.last_access.store(stamp, Ordering::Relaxed);
    }

    /// Logical timestamp of the most recent access.
    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("dims", &self.dims)
            .field("min", &self.min)
            .field("state", &self.state())
            .field("ticket", &self.ticket())
            .finish()
    }
}
