//! The resident tile cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::cache::queue::{FetchQueue, QueuedFetch};
use crate::cache::stats::CacheStats;
use crate::cache::types::{CacheError, CacheHints, LoadingStrategy, TileCacheConfig};
use crate::cache::worker::{self, WorkerContext};
use crate::coord::{TileCoordinate, TileKey, ViewKey};
use crate::pyramid::PyramidModel;
use crate::source::{FetchError, TileSource};
use crate::tile::{Cell, CellState};

/// Bounded cache of decoded tiles with asynchronous loading.
///
/// Requests never fetch inline: missing tiles are queued and fetched by
/// the worker pool, so a tile requested by many readers is downloaded
/// once. `TileCache` is cheap to share; all methods take `&self`.
///
/// Construction spawns the workers, so it must happen inside a Tokio
/// runtime.
pub struct TileCache {
    config: TileCacheConfig,
    pyramid: Arc<PyramidModel>,
    cells: DashMap<TileKey, Arc<Cell>>,
    queue: Arc<FetchQueue>,
    stats: Arc<CacheStats>,
    /// Scheduling epoch, advanced once per rendered frame.
    epoch: Arc<AtomicU64>,
    /// Logical clock behind the per-cell LRU stamps.
    access_clock: AtomicU64,
    /// Serializes eviction sweeps.
    evict_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl TileCache {
    /// Creates the cache and spawns its fetch workers.
    ///
    /// # Arguments
    ///
    /// * `config` - Resident budget and worker pool size
    /// * `pyramid` - Geometry used to size and validate tiles
    /// * `source` - Where missing tiles are fetched from
    pub fn new(
        config: TileCacheConfig,
        pyramid: Arc<PyramidModel>,
        source: Arc<dyn TileSource>,
    ) -> Self {
        let queue = Arc::new(FetchQueue::new());
        let stats = Arc::new(CacheStats::default());
        let epoch = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();

        let worker_count = config.worker_count.max(1);
        let ctx = WorkerContext {
            queue: Arc::clone(&queue),
            source,
            stats: Arc::clone(&stats),
            epoch: Arc::clone(&epoch),
            shutdown: shutdown.clone(),
        };
        for worker_id in 0..worker_count {
            tokio::spawn(worker::run(worker_id, ctx.clone()));
        }
        info!(
            workers = worker_count,
            max_resident_tiles = config.max_resident_tiles,
            "tile cache started"
        );

        Self {
            config,
            pyramid,
            cells: DashMap::new(),
            queue,
            stats,
            epoch,
            access_clock: AtomicU64::new(0),
            evict_lock: Mutex::new(()),
            shutdown,
        }
    }

    /// Requests one tile.
    ///
    /// The strategy in `hints` decides what happens when the tile is not
    /// resident and valid:
    ///
    /// - `Blocking` waits for the load job and returns a valid cell or the
    ///   job's error. A previously failed tile is retried.
    /// - `Volatile` schedules a background load and returns the cell as it
    ///   is right now. A tile that failed in the current epoch stays
    ///   failed; the next epoch retries it.
    /// - `DontLoad` never schedules anything and reports
    ///   [`CacheError::NotYetAvailable`] for absent tiles.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidRequest`] for addresses outside the pyramid,
    /// [`CacheError::ShuttingDown`] after [`TileCache::shutdown`].
    pub async fn request(
        &self,
        view: ViewKey,
        coord: TileCoordinate,
        hints: CacheHints,
    ) -> Result<Arc<Cell>, CacheError> {
        if self.shutdown.is_cancelled() {
            return Err(CacheError::ShuttingDown);
        }
        let (key, dims, min) = self.validated_geometry(view, coord)?;

        match hints.strategy {
            LoadingStrategy::DontLoad => self.resident(key).ok_or(CacheError::NotYetAvailable),
            LoadingStrategy::Volatile => {
                let cell = self.resident_or_insert(key, dims, min);
                self.schedule_if_needed(key, &cell, hints, false);
                Ok(cell)
            }
            LoadingStrategy::Blocking => {
                let cell = self.resident_or_insert(key, dims, min);
                self.schedule_if_needed(key, &cell, hints, true);
                self.wait_settled(key, cell, hints).await
            }
        }
    }

    /// Returns the resident cell for a tile without scheduling anything.
    ///
    /// Unlike a `DontLoad` request this never fails; an absent tile is
    /// simply `None`.
    pub fn get_if_resident(&self, view: ViewKey, coord: TileCoordinate) -> Option<Arc<Cell>> {
        self.resident(TileKey::new(view, coord))
    }

    /// Advances the scheduling epoch at a frame boundary.
    ///
    /// Every queued background fetch from previous epochs is dropped and
    /// its cell reverts to empty, so stale prefetches never compete with
    /// the new frame's requests. Jobs with blocking waiters and jobs
    /// already being fetched are untouched. Returns the new epoch.
    pub fn prepare_next_frame(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let dropped = self
            .queue
            .prune(|entry| entry.blocking || entry.epoch >= epoch);
        let drop_count = dropped.len() as u64;
        for entry in dropped {
            // Only the newest entry speaks for the cell, and a started
            // fetch is never preempted.
            if entry.ticket == entry.cell.ticket() && !entry.cell.is_fetching() {
                entry.cell.reset_to_empty();
            }
        }
        if drop_count > 0 {
            self.stats.queue_drops.fetch_add(drop_count, Ordering::Relaxed);
        }
        debug!(epoch, dropped = drop_count, "frame boundary");
        epoch
    }

    /// Drops every resident cell and every queued background fetch.
    ///
    /// Readers holding a cell keep their snapshot; the cache simply
    /// forgets it, so the next request re-fetches. Jobs with blocking
    /// waiters keep running and settle their (now detached) cells.
    pub fn invalidate_all(&self) {
        let resident = self.cells.len();
        self.cells.clear();
        let dropped = self.queue.prune(|entry| entry.blocking);
        let drop_count = dropped.len() as u64;
        for entry in dropped {
            if entry.ticket == entry.cell.ticket() && !entry.cell.is_fetching() {
                entry.cell.reset_to_empty();
            }
        }
        if drop_count > 0 {
            self.stats.queue_drops.fetch_add(drop_count, Ordering::Relaxed);
        }
        info!(resident, dropped = drop_count, "invalidated all resident tiles");
    }

    /// Shuts the cache down.
    ///
    /// Queued jobs are discarded, workers exit after their current fetch,
    /// and every blocking waiter fails with [`CacheError::ShuttingDown`].
    /// Further requests are rejected. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("tile cache shutting down");
        self.shutdown.cancel();
        for entry in self.queue.drain() {
            if entry.ticket == entry.cell.ticket() && !entry.cell.is_fetching() {
                entry.cell.reset_to_empty();
            }
        }
        self.queue.wake_all();
    }

    /// Returns true once [`TileCache::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Shared statistics counters.
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Number of tiles currently resident.
    pub fn resident_tiles(&self) -> usize {
        self.cells.len()
    }

    /// Number of fetch jobs waiting in the queue.
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Current scheduling epoch.
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// The pyramid this cache serves.
    pub fn pyramid(&self) -> &PyramidModel {
        &self.pyramid
    }

    // ========================================================================
    // Request internals
    // ========================================================================

    fn validated_geometry(
        &self,
        view: ViewKey,
        coord: TileCoordinate,
    ) -> Result<(TileKey, [u32; 3], [i64; 3]), CacheError> {
        if view.level >= self.pyramid.num_levels() {
            return Err(CacheError::InvalidRequest(format!(
                "level {} out of range, pyramid has {} levels",
                view.level,
                self.pyramid.num_levels()
            )));
        }
        match (
            self.pyramid.cell_dims(view.level, coord),
            self.pyramid.cell_min(view.level, coord),
        ) {
            (Some(dims), Some(min)) => Ok((TileKey::new(view, coord), dims, min)),
            _ => Err(CacheError::InvalidRequest(format!(
                "tile {} outside the level {} grid",
                coord, view.level
            ))),
        }
    }

    fn resident(&self, key: TileKey) -> Option<Arc<Cell>> {
        match self.cells.get(&key) {
            Some(entry) => {
                let cell = Arc::clone(entry.value());
                drop(entry);
                self.touch(&cell);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(cell)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn resident_or_insert(&self, key: TileKey, dims: [u32; 3], min: [i64; 3]) -> Arc<Cell> {
        let mut inserted = false;
        let cell = match self.cells.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(slot) => {
                inserted = true;
                let cell = Arc::new(Cell::new(dims, min));
                slot.insert(Arc::clone(&cell));
                cell
            }
        };
        self.touch(&cell);
        if inserted {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            self.evict_over_budget();
        } else {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
        cell
    }

    /// Decides whether a request needs to queue (or re-queue) a fetch.
    fn schedule_if_needed(&self, key: TileKey, cell: &Arc<Cell>, hints: CacheHints, blocking: bool) {
        match cell.state() {
            CellState::Valid => {}
            CellState::Empty => {
                if cell.try_begin_load() {
                    self.push_job(key, cell, hints, blocking, cell.ticket());
                } else {
                    // Lost the transition race; treat like an existing job.
                    self.maybe_requeue(key, cell, hints, blocking);
                }
            }
            CellState::Failed => {
                // Blocking requests always retry a failed tile. Background
                // requests retry once a new epoch starts; within the
                // failure's own epoch the failure is sticky.
                let retry = blocking || self.current_epoch() > cell.failed_epoch();
                if retry && cell.try_begin_load() {
                    self.push_job(key, cell, hints, blocking, cell.ticket());
                }
            }
            CellState::Loading => self.maybe_requeue(key, cell, hints, blocking),
        }
    }

    /// Re-queues a job for a cell that is already loading, if doing so
    /// improves its position.
    ///
    /// The fresh ticket supersedes the old queue entry, which the workers
    /// then skip: the job is moved, never duplicated. A fetch that already
    /// started is left alone.
    fn maybe_requeue(&self, key: TileKey, cell: &Arc<Cell>, hints: CacheHints, blocking: bool) {
        if cell.is_fetching() {
            return;
        }
        // A blocking requester always re-queues: its entry must carry the
        // blocking flag to survive frame pruning.
        if !blocking && hints.priority <= cell.queued_priority() {
            return;
        }
        let ticket = cell.bump_ticket();
        self.push_job(key, cell, hints, blocking, ticket);
    }

    fn push_job(&self, key: TileKey, cell: &Arc<Cell>, hints: CacheHints, blocking: bool, ticket: u64) {
        cell.set_queued_priority(hints.priority);
        let entry = QueuedFetch {
            key,
            cell: Arc::clone(cell),
            priority: hints.priority,
            seq: 0,
            epoch: self.current_epoch(),
            ticket,
            blocking,
        };
        self.queue.push(entry, hints.enqueue_to_front);
        trace!(key = %key, priority = hints.priority, blocking, "fetch queued");
    }

    /// Waits until the cell settles, re-scheduling if the job gets lost.
    async fn wait_settled(
        &self,
        key: TileKey,
        cell: Arc<Cell>,
        hints: CacheHints,
    ) -> Result<Arc<Cell>, CacheError> {
        let mut rx = cell.subscribe();
        let mut waited = false;
        loop {
            let state = *rx.borrow_and_update();
            match state {
                CellState::Valid => return Ok(cell),
                CellState::Failed => {
                    let error = cell.failure().unwrap_or_else(|| {
                        FetchError::Transport("tile load failed".to_string())
                    });
                    return Err(CacheError::Fetch(error));
                }
                CellState::Empty => {
                    // The queued job was pruned before a worker picked it
                    // up; put it back.
                    self.schedule_if_needed(key, &cell, hints, true);
                }
                CellState::Loading => {}
            }
            if !waited {
                waited = true;
                self.stats.blocking_waits.fetch_add(1, Ordering::Relaxed);
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(CacheError::ShuttingDown),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(CacheError::ShuttingDown);
                    }
                }
            }
        }
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    fn touch(&self, cell: &Cell) {
        cell.touch(self.access_clock.fetch_add(1, Ordering::Relaxed) + 1);
    }

    /// Evicts least recently used cells until the resident count is back
    /// within budget.
    ///
    /// A cell is only evictable while the cache holds the sole `Arc` to
    /// it: readers, queued jobs, and running fetches all pin their cells
    /// by holding a clone.
    fn evict_over_budget(&self) {
        // Losing the race just means another request is already sweeping.
        let Ok(_guard) = self.evict_lock.try_lock() else {
            return;
        };
        let budget = self.config.max_resident_tiles;
        if self.cells.len() <= budget {
            return;
        }

        let mut candidates: Vec<(TileKey, u64)> = self
            .cells
            .iter()
            .filter(|entry| Arc::strong_count(entry.value()) == 1)
            .map(|entry| (*entry.key(), entry.value().last_access()))
            .collect();
        candidates.sort_unstable_by_key(|&(_, stamp)| stamp);

        let mut evicted = 0u64;
        for (key, _) in candidates {
            if self.cells.len() <= budget {
                break;
            }
            // Re-check the pin under the shard lock; a reader may have
            // cloned the cell since the scan.
            let removed = self
                .cells
                .remove_if(&key, |_, cell| Arc::strong_count(cell) == 1);
            if removed.is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(
                evicted,
                resident = self.cells.len(),
                "evicted least recently used tiles"
            );
        }
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.queue.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawTile;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Source that serves numbered gradient tiles after an optional delay.
    struct TestSource {
        tile_dims: [u32; 3],
        delay: Duration,
        fail: bool,
        fetches: AtomicUsize,
    }

    impl TestSource {
        fn new(tile_dims: [u32; 3]) -> Self {
            Self {
                tile_dims,
                delay: Duration::ZERO,
                fail: false,
                fetches: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        fn gradient(dims: [u32; 3]) -> Vec<u32> {
            let [w, h, d] = dims;
            let mut pixels = Vec::with_capacity((w * h * d) as usize);
            for z in 0..d {
                for y in 0..h {
                    for x in 0..w {
                        pixels.push(x + 100 * y + 10_000 * z);
                    }
                }
            }
            pixels
        }
    }

    impl TileSource for TestSource {
        fn fetch(
            &self,
            _view: ViewKey,
            _coord: TileCoordinate,
        ) -> Pin<Box<dyn Future<Output = Result<RawTile, FetchError>> + Send + '_>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            let result = if self.fail {
                Err(FetchError::Http { status: 500 })
            } else {
                Ok(RawTile::new(self.tile_dims, Self::gradient(self.tile_dims)))
            };
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            })
        }
    }

    fn small_pyramid() -> Arc<PyramidModel> {
        // 48x48 image, 32x32 tiles: 2x2 grid with cropped edge tiles.
        Arc::new(PyramidModel::new([48, 48, 1], [32, 32, 1], 2).unwrap())
    }

    fn cache_with(source: Arc<TestSource>, max_tiles: usize) -> TileCache {
        TileCache::new(
            TileCacheConfig::new()
                .with_max_resident_tiles(max_tiles)
                .with_worker_count(2),
            small_pyramid(),
            source,
        )
    }

    async fn wait_valid(cell: &Cell) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !cell.is_valid() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "tile did not load in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_out_of_range_level_rejected() {
        let cache = cache_with(Arc::new(TestSource::new([32, 32, 1])), 16);
        let err = cache
            .request(
                ViewKey::new(0, 0, 9),
                TileCoordinate::planar(0, 0),
                CacheHints::blocking(0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_out_of_grid_tile_rejected() {
        let cache = cache_with(Arc::new(TestSource::new([32, 32, 1])), 16);
        let err = cache
            .request(
                ViewKey::new(0, 0, 0),
                TileCoordinate::planar(2, 0),
                CacheHints::dont_load(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_dont_load_reports_absent_tiles() {
        let source = Arc::new(TestSource::new([32, 32, 1]));
        let cache = cache_with(Arc::clone(&source), 16);
        let err = cache
            .request(
                ViewKey::new(0, 0, 0),
                TileCoordinate::planar(0, 0),
                CacheHints::dont_load(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::NotYetAvailable);
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_blocking_request_fills_cell() {
        let source = Arc::new(TestSource::new([32, 32, 1]));
        let cache = cache_with(Arc::clone(&source), 16);
        let cell = cache
            .request(
                ViewKey::new(0, 0, 0),
                TileCoordinate::planar(0, 0),
                CacheHints::blocking(1),
            )
            .await
            .unwrap();
        assert!(cell.is_valid());
        assert_eq!(cell.dims(), [32, 32, 1]);
        let data = cell.data().unwrap();
        assert_eq!(data.len(), 32 * 32);
        assert_eq!(data[0], 0);
        assert_eq!(data[33], 1 + 100);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_edge_cell_is_cropped() {
        let source = Arc::new(TestSource::new([32, 32, 1]));
        let cache = cache_with(Arc::clone(&source), 16);
        // Tile (1, 1) of a 48x48 image covers only 16x16 pixels.
        let cell = cache
            .request(
                ViewKey::new(0, 0, 0),
                TileCoordinate::planar(1, 1),
                CacheHints::blocking(1),
            )
            .await
            .unwrap();
        assert_eq!(cell.dims(), [16, 16, 1]);
        assert_eq!(cell.min(), [32, 32, 0]);
        let data = cell.data().unwrap();
        assert_eq!(data.len(), 16 * 16);
        // Row 1 of the crop comes from row 1 of the 32-wide source tile.
        assert_eq!(data[16], 100);
    }

    #[tokio::test]
    async fn test_volatile_returns_immediately_and_loads_in_background() {
        let source = Arc::new(TestSource::new([32, 32, 1]).with_delay(Duration::from_millis(30)));
        let cache = cache_with(Arc::clone(&source), 16);
        let cell = cache
            .request(
                ViewKey::new(0, 0, 0),
                TileCoordinate::planar(0, 0),
                CacheHints::volatile(1),
            )
            .await
            .unwrap();
        assert!(!cell.is_valid());
        wait_valid(&cell).await;
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_requests_share_one_fetch() {
        let source = Arc::new(TestSource::new([32, 32, 1]));
        let cache = cache_with(Arc::clone(&source), 16);
        let view = ViewKey::new(0, 0, 0);
        let coord = TileCoordinate::planar(0, 0);
        cache
            .request(view, coord, CacheHints::blocking(1))
            .await
            .unwrap();
        cache
            .request(view, coord, CacheHints::blocking(1))
            .await
            .unwrap();
        cache
            .request(view, coord, CacheHints::volatile(1))
            .await
            .unwrap();
        assert_eq!(source.fetch_count(), 1);

        let snapshot = cache.stats().snapshot();
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.loads_completed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let cache = cache_with(Arc::new(TestSource::new([32, 32, 1])), 16);
        cache.shutdown();
        assert!(cache.is_shut_down());
        let err = cache
            .request(
                ViewKey::new(0, 0, 0),
                TileCoordinate::planar(0, 0),
                CacheHints::blocking(0),
            )
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::ShuttingDown);
        // Idempotent.
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_epoch_advances_per_frame() {
        let cache = cache_with(Arc::new(TestSource::new([32, 32, 1])), 16);
        assert_eq!(cache.current_epoch(), 0);
        assert_eq!(cache.prepare_next_frame(), 1);
        assert_eq!(cache.prepare_next_frame(), 2);
        assert_eq!(cache.current_epoch(), 2);
    }
}
