//! The dataset facade.

use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::cache::{CacheError, CacheHints, TileCache, TileCacheConfig};
use crate::coord::{TileCoordinate, ViewKey};
use crate::dataset::image::CachedImage;
use crate::ordering::{MipmapOrdering, OrderingConfig, RenderPlan};
use crate::pyramid::{Affine3, PyramidModel};
use crate::source::TileSource;
use crate::tile::Cell;

/// Shape and policy of a dataset session.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Number of time points in the dataset.
    pub num_timepoints: u32,
    /// Number of acquisition setups (channels, angles) per time point.
    pub num_setups: u32,
    /// Tile cache sizing.
    pub cache: TileCacheConfig,
    /// Level selection policy.
    pub ordering: OrderingConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            num_timepoints: 1,
            num_setups: 1,
            cache: TileCacheConfig::default(),
            ordering: OrderingConfig::default(),
        }
    }
}

impl DatasetConfig {
    /// Creates the default configuration: one time point, one setup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of time points.
    pub fn with_num_timepoints(mut self, num_timepoints: u32) -> Self {
        self.num_timepoints = num_timepoints;
        self
    }

    /// Sets the number of setups.
    pub fn with_num_setups(mut self, num_setups: u32) -> Self {
        self.num_setups = num_setups;
        self
    }

    /// Replaces the cache configuration.
    pub fn with_cache(mut self, cache: TileCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the ordering configuration.
    pub fn with_ordering(mut self, ordering: OrderingConfig) -> Self {
        self.ordering = ordering;
        self
    }
}

/// One open dataset: a tile cache, its pyramid, and the level selection
/// strategy, behind the query API consumers render from.
///
/// Construction spawns the cache workers, so it must happen inside a
/// Tokio runtime. Range checks happen here: a bad timepoint, setup, or
/// level fails fast with [`CacheError::InvalidRequest`].
pub struct Dataset {
    config: DatasetConfig,
    pyramid: Arc<PyramidModel>,
    cache: TileCache,
    ordering: MipmapOrdering,
}

impl Dataset {
    /// Opens a dataset over `pyramid`, loading tiles from `source`.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidRequest`] when the configuration declares zero
    /// time points or setups.
    pub fn new(
        config: DatasetConfig,
        pyramid: Arc<PyramidModel>,
        source: Arc<dyn TileSource>,
    ) -> Result<Self, CacheError> {
        if config.num_timepoints == 0 || config.num_setups == 0 {
            return Err(CacheError::InvalidRequest(format!(
                "dataset needs at least one timepoint and one setup, got {} and {}",
                config.num_timepoints, config.num_setups
            )));
        }
        let cache = TileCache::new(config.cache.clone(), Arc::clone(&pyramid), source);
        let ordering = MipmapOrdering::with_config(Arc::clone(&pyramid), config.ordering);
        Ok(Self {
            config,
            pyramid,
            cache,
            ordering,
        })
    }

    /// Returns the slice after loading every one of its tiles.
    ///
    /// Tiles load concurrently across the worker pool; the call returns
    /// once all of them settle. The first fetch failure is reported.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidRequest`] for out-of-range addresses,
    /// [`CacheError::Fetch`] when a tile load fails,
    /// [`CacheError::ShuttingDown`] after shutdown.
    pub async fn image(
        &self,
        timepoint: u32,
        setup: u32,
        level: u32,
    ) -> Result<CachedImage, CacheError> {
        let hints = CacheHints::blocking(self.steady_priority(level));
        self.image_with_hints(timepoint, setup, level, hints).await
    }

    /// Returns the slice immediately with whatever tiles are resident,
    /// scheduling background loads for the rest.
    ///
    /// Unloaded tiles read as `None` through the view and fill in as
    /// their fetches complete.
    pub async fn volatile_image(
        &self,
        timepoint: u32,
        setup: u32,
        level: u32,
    ) -> Result<CachedImage, CacheError> {
        let hints = CacheHints::volatile(self.steady_priority(level));
        self.image_with_hints(timepoint, setup, level, hints).await
    }

    /// Returns the slice with caller-chosen hints, typically taken from a
    /// [`RenderPlan`] level.
    pub async fn image_with_hints(
        &self,
        timepoint: u32,
        setup: u32,
        level: u32,
        hints: CacheHints,
    ) -> Result<CachedImage, CacheError> {
        let view = self.validated_view(timepoint, setup, level)?;
        let descriptor = self
            .pyramid
            .level(level)
            .ok_or_else(|| CacheError::InvalidRequest(format!("no level {level}")))?;
        let grid = descriptor.grid_dims;
        let dims = descriptor.dims;
        let tile_dims = descriptor.tile_dims;

        let requests: Vec<_> = grid_coords(grid)
            .map(|coord| self.cache.request(view, coord, hints))
            .collect();
        let mut cells = Vec::with_capacity(requests.len());
        for result in join_all(requests).await {
            cells.push(result?);
        }
        debug!(view = %view, tiles = cells.len(), strategy = %hints.strategy, "assembled image view");
        Ok(CachedImage::new(view, dims, tile_dims, grid, cells))
    }

    /// Requests a single tile of the dataset.
    ///
    /// # Errors
    ///
    /// As for [`crate::cache::TileCache::request`], plus range validation
    /// of `timepoint` and `setup`.
    pub async fn tile(
        &self,
        timepoint: u32,
        setup: u32,
        level: u32,
        coord: TileCoordinate,
        hints: CacheHints,
    ) -> Result<Arc<Cell>, CacheError> {
        let view = self.validated_view(timepoint, setup, level)?;
        self.cache.request(view, coord, hints).await
    }

    /// Finest fully resident level at or coarser than `finest_level`.
    ///
    /// Volatile consumers use this to substitute coarser data while finer
    /// tiles are still loading. `None` when no level at or below the
    /// requested resolution is completely loaded.
    pub fn best_resident_level(
        &self,
        timepoint: u32,
        setup: u32,
        finest_level: u32,
    ) -> Result<Option<u32>, CacheError> {
        self.validated_view(timepoint, setup, finest_level)?;
        for level in finest_level..self.pyramid.num_levels() {
            let view = ViewKey::new(timepoint, setup, level);
            let grid = self
                .pyramid
                .level(level)
                .map(|descriptor| descriptor.grid_dims)
                .unwrap_or([0, 0, 0]);
            let fully_resident = grid_coords(grid).all(|coord| {
                self.cache
                    .get_if_resident(view, coord)
                    .is_some_and(|cell| cell.is_valid())
            });
            if fully_resident {
                return Ok(Some(level));
            }
        }
        Ok(None)
    }

    /// Computes the render/prefetch plan for the current screen transform.
    pub fn compute_plan(
        &self,
        screen_transform: &Affine3,
        timepoint: u32,
        previous_timepoint: u32,
    ) -> RenderPlan {
        self.ordering
            .compute_plan(screen_transform, timepoint, previous_timepoint)
    }

    /// Finest level adequate for the given screen transform.
    pub fn best_level(&self, screen_transform: &Affine3) -> u32 {
        self.ordering.best_level(screen_transform)
    }

    /// Per-level downsampling factors, finest first.
    pub fn mipmap_resolutions(&self) -> Vec<[u32; 3]> {
        self.pyramid.resolutions()
    }

    /// Per-level transforms into full-resolution coordinates.
    pub fn mipmap_transforms(&self) -> Vec<Affine3> {
        self.pyramid.transforms()
    }

    /// Number of resolution levels.
    pub fn num_mipmap_levels(&self) -> u32 {
        self.pyramid.num_levels()
    }

    /// Number of time points.
    pub fn num_timepoints(&self) -> u32 {
        self.config.num_timepoints
    }

    /// Number of setups.
    pub fn num_setups(&self) -> u32 {
        self.config.num_setups
    }

    /// The pyramid geometry.
    pub fn pyramid(&self) -> &PyramidModel {
        &self.pyramid
    }

    /// The underlying tile cache.
    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Advances the scheduling epoch at a frame boundary.
    pub fn prepare_next_frame(&self) -> u64 {
        self.cache.prepare_next_frame()
    }

    /// Drops all resident tiles so future requests re-fetch.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all()
    }

    /// Shuts the dataset's cache down.
    pub fn shutdown(&self) {
        self.cache.shutdown()
    }

    fn steady_priority(&self, level: u32) -> i32 {
        self.pyramid.num_levels().saturating_sub(1 + level) as i32
    }

    fn validated_view(
        &self,
        timepoint: u32,
        setup: u32,
        level: u32,
    ) -> Result<ViewKey, CacheError> {
        if timepoint >= self.config.num_timepoints {
            return Err(CacheError::InvalidRequest(format!(
                "timepoint {} out of range, dataset has {}",
                timepoint, self.config.num_timepoints
            )));
        }
        if setup >= self.config.num_setups {
            return Err(CacheError::InvalidRequest(format!(
                "setup {} out of range, dataset has {}",
                setup, self.config.num_setups
            )));
        }
        if level >= self.pyramid.num_levels() {
            return Err(CacheError::InvalidRequest(format!(
                "level {} out of range, pyramid has {} levels",
                level,
                self.pyramid.num_levels()
            )));
        }
        Ok(ViewKey::new(timepoint, setup, level))
    }
}

/// Grid coordinates in view order: column fastest, then row, then depth.
fn grid_coords(grid: [u64; 3]) -> impl Iterator<Item = TileCoordinate> {
    (0..grid[2]).flat_map(move |depth| {
        (0..grid[1]).flat_map(move |row| {
            (0..grid[0])
                .map(move |col| TileCoordinate::new(col as u32, row as u32, depth as u32))
        })
    })
}
