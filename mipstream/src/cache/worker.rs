//! Fetch worker loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cache::queue::{FetchQueue, QueuedFetch};
use crate::cache::stats::CacheStats;
use crate::source::{FetchError, RawTile, TileSource};

/// Everything a fetch worker needs, cloned per worker task.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub queue: Arc<FetchQueue>,
    pub source: Arc<dyn TileSource>,
    pub stats: Arc<CacheStats>,
    pub epoch: Arc<AtomicU64>,
    pub shutdown: CancellationToken,
}

/// Runs one fetch worker until shutdown.
pub(crate) async fn run(worker_id: usize, ctx: WorkerContext) {
    debug!(worker_id, "fetch worker started");
    loop {
        tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            _ = ctx.queue.notified() => {}
        }
        while let Some(entry) = ctx.queue.pop() {
            if ctx.shutdown.is_cancelled() {
                break;
            }
            // Wake a sibling for the rest of the queue while this worker
            // is busy fetching.
            if !ctx.queue.is_empty() {
                ctx.queue.wake_one();
            }
            execute(&ctx, entry).await;
        }
        if ctx.shutdown.is_cancelled() {
            break;
        }
    }
    debug!(worker_id, "fetch worker stopped");
}

/// Processes one queue entry: fetch, crop, settle the cell.
async fn execute(ctx: &WorkerContext, entry: QueuedFetch) {
    let cell = &entry.cell;
    if entry.ticket != cell.ticket() {
        trace!(key = %entry.key, "skipping superseded job");
        return;
    }
    if cell.state().is_settled() {
        return;
    }
    if !cell.try_acquire_fetch() {
        // Another worker is already fetching this tile; its result will
        // settle the cell for every waiter.
        return;
    }
    if cell.state().is_settled() {
        cell.release_fetch();
        return;
    }
    // Frame pruning may have reset the cell while this entry was being
    // enqueued; normalize before fetching.
    cell.mark_loading();

    trace!(key = %entry.key, priority = entry.priority, "fetching tile");
    let fetched = ctx.source.fetch(entry.key.view, entry.key.coord).await;
    match fetched.and_then(|raw| crop_to_cell(raw, cell.dims())) {
        Ok(pixels) => {
            cell.fill(pixels);
            ctx.stats.loads_completed.fetch_add(1, Ordering::Relaxed);
            trace!(key = %entry.key, "tile loaded");
        }
        Err(error) => {
            let epoch = ctx.epoch.load(Ordering::Acquire);
            warn!(key = %entry.key, error = %error, epoch, "tile load failed");
            cell.fail(error, epoch);
            ctx.stats.load_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
    cell.release_fetch();
}

/// Cuts the cell's extent out of a nominal-size tile.
///
/// Sources deliver full tiles even at the image border; resident cells
/// keep only the pixels inside the image.
fn crop_to_cell(raw: RawTile, cell_dims: [u32; 3]) -> Result<Vec<u32>, FetchError> {
    let misshapen = raw.pixels.len() != raw.num_pixels()
        || (0..3).any(|axis| raw.dims[axis] < cell_dims[axis]);
    if misshapen {
        return Err(FetchError::UnexpectedDimensions {
            expected: cell_dims,
            actual: raw.dims,
        });
    }
    if raw.dims == cell_dims {
        return Ok(raw.pixels);
    }

    let [cell_w, cell_h, cell_d] = cell_dims.map(|d| d as usize);
    let [raw_w, raw_h, _] = raw.dims.map(|d| d as usize);
    let mut pixels = Vec::with_capacity(cell_w * cell_h * cell_d);
    for z in 0..cell_d {
        for y in 0..cell_h {
            let offset = (z * raw_h + y) * raw_w;
            pixels.extend_from_slice(&raw.pixels[offset..offset + cell_w]);
        }
    }
    Ok(pixels)
}
