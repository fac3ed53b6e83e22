//! Priority queue feeding the fetch workers.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::coord::TileKey;
use crate::tile::Cell;

/// One queued fetch job.
///
/// The entry pins its cell via `Arc`, which also protects the cell from
/// eviction while the job waits. `ticket` snapshots the cell's ticket at
/// enqueue time; a mismatch when the entry is popped means a newer entry
/// has superseded this one.
pub(crate) struct QueuedFetch {
    /// Address of the tile to fetch.
    pub key: TileKey,
    /// The cell to fill.
    pub cell: Arc<Cell>,
    /// Queue priority; higher values are served earlier.
    pub priority: i32,
    /// Submission sequence. Back entries count up, front entries count
    /// down, so front entries win ties within one priority.
    pub seq: i64,
    /// Scheduling epoch the job was submitted in.
    pub epoch: u64,
    /// Cell ticket at enqueue time.
    pub ticket: u64,
    /// A blocking requester waits on this job; it must survive pruning.
    pub blocking: bool,
}

impl PartialEq for QueuedFetch {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedFetch {}

impl PartialOrd for QueuedFetch {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedFetch {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: highest priority first, then lowest sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Shared job queue between requesters and the worker pool.
pub(crate) struct FetchQueue {
    heap: Mutex<BinaryHeap<QueuedFetch>>,
    notify: Notify,
    back_seq: AtomicI64,
    front_seq: AtomicI64,
}

impl FetchQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            back_seq: AtomicI64::new(1),
            front_seq: AtomicI64::new(-1),
        }
    }

    /// Enqueues a job and wakes one worker. A front push jumps ahead of
    /// everything already queued at the same priority.
    pub fn push(&self, mut entry: QueuedFetch, front: bool) {
        entry.seq = if front {
            self.front_seq.fetch_sub(1, Ordering::Relaxed)
        } else {
            self.back_seq.fetch_add(1, Ordering::Relaxed)
        };
        self.heap.lock().unwrap().push(entry);
        self.notify.notify_one();
    }

    /// Takes the most urgent job, if any.
    pub fn pop(&self) -> Option<QueuedFetch> {
        self.heap.lock().unwrap().pop()
    }

    /// Waits until a push signals new work.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wakes one parked worker.
    pub fn wake_one(&self) {
        self.notify.notify_one();
    }

    /// Wakes every parked worker.
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Drops every entry that fails the predicate and returns the dropped
    /// entries.
    pub fn prune<F>(&self, mut keep: F) -> Vec<QueuedFetch>
    where
        F: FnMut(&QueuedFetch) -> bool,
    {
        let mut heap = self.heap.lock().unwrap();
        let (kept, dropped): (Vec<_>, Vec<_>) = heap.drain().partition(|entry| keep(entry));
        *heap = BinaryHeap::from(kept);
        dropped
    }

    /// Empties the queue, returning all entries.
    pub fn drain(&self) -> Vec<QueuedFetch> {
        self.heap.lock().unwrap().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{TileCoordinate, ViewKey};

    fn entry(col: u32, priority: i32, blocking: bool) -> QueuedFetch {
        QueuedFetch {
            key: TileKey::new(ViewKey::new(0, 0, 0), TileCoordinate::planar(col, 0)),
            cell: Arc::new(Cell::new([2, 2, 1], [0, 0, 0])),
            priority,
            seq: 0,
            epoch: 0,
            ticket: 0,
            blocking,
        }
    }

    fn popped_cols(queue: &FetchQueue) -> Vec<u32> {
        let mut cols = Vec::new();
        while let Some(e) = queue.pop() {
            cols.push(e.key.coord.col);
        }
        cols
    }

    #[test]
    fn test_higher_priority_pops_first() {
        let queue = FetchQueue::new();
        queue.push(entry(0, 0, false), false);
        queue.push(entry(1, 5, false), false);
        queue.push(entry(2, 2, false), false);
        assert_eq!(popped_cols(&queue), vec![1, 2, 0]);
    }

    #[test]
    fn test_fifo_within_one_priority() {
        let queue = FetchQueue::new();
        queue.push(entry(0, 1, false), false);
        queue.push(entry(1, 1, false), false);
        queue.push(entry(2, 1, false), false);
        assert_eq!(popped_cols(&queue), vec![0, 1, 2]);
    }

    #[test]
    fn test_front_push_jumps_its_priority_bucket() {
        let queue = FetchQueue::new();
        queue.push(entry(0, 1, false), false);
        queue.push(entry(1, 1, false), false);
        queue.push(entry(2, 1, false), true);
        queue.push(entry(3, 1, true), true);
        // Front entries pop newest-first, ahead of the back entries.
        assert_eq!(popped_cols(&queue), vec![3, 2, 0, 1]);
    }

    #[test]
    fn test_front_push_does_not_beat_higher_priority() {
        let queue = FetchQueue::new();
        queue.push(entry(0, 5, false), false);
        queue.push(entry(1, 1, false), true);
        assert_eq!(popped_cols(&queue), vec![0, 1]);
    }

    #[test]
    fn test_prune_returns_dropped_entries() {
        let queue = FetchQueue::new();
        queue.push(entry(0, 1, false), false);
        queue.push(entry(1, 1, true), false);
        queue.push(entry(2, 2, false), false);

        let dropped = queue.prune(|e| e.blocking);
        let mut dropped_cols: Vec<u32> = dropped.iter().map(|e| e.key.coord.col).collect();
        dropped_cols.sort_unstable();
        assert_eq!(dropped_cols, vec![0, 2]);
        assert_eq!(popped_cols(&queue), vec![1]);
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = FetchQueue::new();
        queue.push(entry(0, 1, false), false);
        queue.push(entry(1, 2, false), false);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
