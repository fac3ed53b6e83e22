//! Integration tests for the dataset facade.
//!
//! These tests verify the consumer-facing workflow including:
//! - Blocking and volatile image assembly over the tile grid
//! - Pixel addressing across tile boundaries and cropped edge tiles
//! - Render plan computation driving per-level image requests
//! - The two-pass time transition and its single-frame expiry
//! - The full HTTP path: URL templating, PNG decoding, cache fill
//! - Invalidation and shutdown through the facade

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mipstream::cache::{CacheError, TileCacheConfig};
use mipstream::coord::{TileCoordinate, ViewKey};
use mipstream::dataset::{CachedImage, Dataset, DatasetConfig};
use mipstream::pyramid::{Affine3, PyramidModel};
use mipstream::source::{
    AsyncHttpClient, FetchError, HttpSourceConfig, HttpTileSource, RawTile, TileSource,
};

// =============================================================================
// Test Helpers
// =============================================================================

/// Serves tiles whose pixels encode (tile coordinate, local offset), so
/// stitched reads can be checked across tile boundaries.
struct PatternSource {
    tile_dims: [u32; 3],
    delay: Duration,
    fetches: AtomicUsize,
}

impl PatternSource {
    fn new(tile_dims: [u32; 3]) -> Self {
        Self {
            tile_dims,
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn pixel(coord: TileCoordinate, local: u32) -> u32 {
        coord.col * 1_000_000 + coord.row * 100_000 + local
    }
}

impl TileSource for PatternSource {
    fn fetch(
        &self,
        _view: ViewKey,
        coord: TileCoordinate,
    ) -> Pin<Box<dyn Future<Output = Result<RawTile, FetchError>> + Send + '_>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay;
        let count: usize = self.tile_dims.iter().map(|&d| d as usize).product();
        let pixels = (0..count as u32)
            .map(|local| Self::pixel(coord, local))
            .collect();
        let tile = RawTile::new(self.tile_dims, pixels);
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(tile)
        })
    }
}

/// In-memory HTTP client that answers every GET with the same PNG body.
#[derive(Clone)]
struct PngServer {
    body: Vec<u8>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl PngServer {
    fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn requested_urls(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl AsyncHttpClient for PngServer {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        Ok(self.body.clone())
    }
}

/// A 32x32 PNG whose pixel (x, y) is rgba(x, y, 77, 255).
fn png_tile() -> Vec<u8> {
    let img = image::RgbaImage::from_fn(32, 32, |x, y| {
        image::Rgba([x as u8, y as u8, 77, 255])
    });
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();
    bytes
}

fn dataset_over(
    source: Arc<dyn TileSource>,
    base_dims: [u64; 3],
    num_levels: u32,
) -> Dataset {
    let pyramid = Arc::new(PyramidModel::new(base_dims, [32, 32, 1], num_levels).unwrap());
    let config = DatasetConfig::new()
        .with_num_timepoints(3)
        .with_num_setups(2)
        .with_cache(TileCacheConfig::new().with_max_resident_tiles(256));
    Dataset::new(config, pyramid, source).unwrap()
}

fn zoom(scale: f64) -> Affine3 {
    Affine3::scale_and_translate([scale, scale, 1.0], [0.0, 0.0, 0.0])
}

async fn wait_fully_loaded(image: &CachedImage) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !image.is_fully_loaded() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "image never finished loading"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Image assembly
// =============================================================================

#[tokio::test]
async fn test_blocking_image_stitches_tiles() {
    let source = Arc::new(PatternSource::new([32, 32, 1]));
    let dataset = dataset_over(Arc::clone(&source) as Arc<dyn TileSource>, [96, 96, 1], 2);

    let image = tokio::select! {
        result = dataset.image(0, 0, 0) => result.unwrap(),
        _ = tokio::time::sleep(Duration::from_secs(2)) => panic!("blocking image timed out"),
    };
    assert!(image.is_fully_loaded());
    assert_eq!(image.grid_dims(), [3, 3, 1]);
    assert_eq!(source.fetch_count(), 9);

    // Neighboring pixels across a tile boundary come from different cells.
    let expect = |x: u64, y: u64| {
        let coord = TileCoordinate::planar((x / 32) as u32, (y / 32) as u32);
        let local = ((y % 32) * 32 + x % 32) as u32;
        PatternSource::pixel(coord, local)
    };
    assert_eq!(image.get(31, 10, 0), Some(expect(31, 10)));
    assert_eq!(image.get(32, 10, 0), Some(expect(32, 10)));
    assert_eq!(image.get(10, 31, 0), Some(expect(10, 31)));
    assert_eq!(image.get(10, 32, 0), Some(expect(10, 32)));
    assert_eq!(image.get(95, 95, 0), Some(expect(95, 95)));
}

#[tokio::test]
async fn test_image_handles_cropped_edge_tiles() {
    let source = Arc::new(PatternSource::new([32, 32, 1]));
    // 80x48: the right column and bottom row of tiles are cropped.
    let dataset = dataset_over(Arc::clone(&source) as Arc<dyn TileSource>, [80, 48, 1], 1);

    let image = dataset.image(0, 0, 0).await.unwrap();
    assert_eq!(image.grid_dims(), [3, 2, 1]);

    let corner = image.cell_at(TileCoordinate::planar(2, 1)).unwrap();
    assert_eq!(corner.dims(), [16, 16, 1]);

    // The source serves full 32x32 tiles; the cache keeps the upper-left
    // crop, so local (15, 15) maps to source offset 15 * 32 + 15.
    let expected = PatternSource::pixel(TileCoordinate::planar(2, 1), 15 * 32 + 15);
    assert_eq!(image.get(79, 47, 0), Some(expected));
    assert_eq!(image.get(80, 47, 0), None);
}

#[tokio::test]
async fn test_volatile_image_returns_fast_and_fills() {
    let source = Arc::new(PatternSource::new([32, 32, 1]).with_delay(Duration::from_millis(100)));
    let dataset = dataset_over(Arc::clone(&source) as Arc<dyn TileSource>, [96, 96, 1], 2);

    let started = std::time::Instant::now();
    let image = dataset.volatile_image(0, 0, 0).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(80),
        "volatile image must not wait for fetches"
    );

    wait_fully_loaded(&image).await;
    assert_eq!(
        image.get(0, 0, 0),
        Some(PatternSource::pixel(TileCoordinate::planar(0, 0), 0))
    );
}

#[tokio::test]
async fn test_distinct_views_do_not_share_tiles() {
    let source = Arc::new(PatternSource::new([32, 32, 1]));
    let dataset = dataset_over(Arc::clone(&source) as Arc<dyn TileSource>, [32, 32, 1], 1);

    dataset.image(0, 0, 0).await.unwrap();
    dataset.image(1, 0, 0).await.unwrap();
    dataset.image(0, 1, 0).await.unwrap();
    // Same slice again: served from residency.
    dataset.image(0, 0, 0).await.unwrap();
    assert_eq!(source.fetch_count(), 3);
}

// =============================================================================
// Plan-driven rendering
// =============================================================================

#[tokio::test]
async fn test_driving_a_steady_plan_loads_planned_levels() {
    let source = Arc::new(PatternSource::new([32, 32, 1]));
    let dataset = dataset_over(Arc::clone(&source) as Arc<dyn TileSource>, [128, 128, 1], 3);

    let plan = dataset.compute_plan(&zoom(0.5), 1, 1);
    assert!(!plan.single_frame_only);
    let planned: Vec<u32> = plan.levels.iter().map(|entry| entry.level).collect();
    assert_eq!(planned, vec![1, 2]);

    let mut images = Vec::new();
    for entry in plan.prefetch_sequence() {
        let image = dataset
            .image_with_hints(1, 0, entry.level, entry.prefetch_hints)
            .await
            .unwrap();
        images.push(image);
    }
    for image in &images {
        wait_fully_loaded(image).await;
    }
    assert_eq!(
        dataset.best_resident_level(1, 0, 0).unwrap(),
        Some(1),
        "both planned levels resident, level 1 is the finest"
    );
}

#[tokio::test]
async fn test_time_transition_plans_two_levels_then_recomputes() {
    let source = Arc::new(PatternSource::new([32, 32, 1]));
    let dataset = dataset_over(Arc::clone(&source) as Arc<dyn TileSource>, [128, 128, 1], 3);

    let transition = dataset.compute_plan(&zoom(1.0), 1, 0);
    assert!(transition.single_frame_only);
    let planned: Vec<u32> = transition.levels.iter().map(|entry| entry.level).collect();
    assert_eq!(planned, vec![0, 2]);
    // The coarsest level is the first prefetch and carries top priority.
    assert_eq!(transition.prefetch_sequence()[0].level, 2);
    assert_eq!(transition.levels[1].prefetch_hints.priority, 2);

    // Next frame, same time point: back to the full steady plan.
    let steady = dataset.compute_plan(&zoom(1.0), 1, 1);
    assert!(!steady.single_frame_only);
    let planned: Vec<u32> = steady.levels.iter().map(|entry| entry.level).collect();
    assert_eq!(planned, vec![0, 1, 2]);
}

// =============================================================================
// HTTP path
// =============================================================================

#[tokio::test]
async fn test_http_source_end_to_end() {
    let client = PngServer::new(png_tile());
    let source = HttpTileSource::new(
        client.clone(),
        HttpSourceConfig::new(
            "https://tiles.test/{time}/{setup}/{level}/{row}/{col}/{depth}.png",
            32,
            32,
        ),
    );
    let dataset = dataset_over(Arc::new(source), [64, 64, 1], 1);

    let image = tokio::select! {
        result = dataset.image(2, 1, 0) => result.unwrap(),
        _ = tokio::time::sleep(Duration::from_secs(2)) => panic!("HTTP image timed out"),
    };
    assert!(image.is_fully_loaded());

    // Decoded pixels are packed ARGB: a=255, r=x, g=y, b=77.
    assert_eq!(image.get(0, 0, 0), Some(0xFF00_004D));
    assert_eq!(image.get(3, 1, 0), Some(0xFF03_014D));
    // Tile (1, 0) serves global x = 33 as local x = 1.
    assert_eq!(image.get(33, 1, 0), Some(0xFF01_014D));

    let mut urls = client.requested_urls();
    urls.sort();
    assert_eq!(urls.len(), 4);
    assert!(urls.contains(&"https://tiles.test/2/1/0/0/0/0.png".to_string()));
    assert!(urls.contains(&"https://tiles.test/2/1/0/1/1/0.png".to_string()));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_invalidate_all_refetches_through_facade() {
    let source = Arc::new(PatternSource::new([32, 32, 1]));
    let dataset = dataset_over(Arc::clone(&source) as Arc<dyn TileSource>, [64, 64, 1], 1);

    dataset.image(0, 0, 0).await.unwrap();
    assert_eq!(source.fetch_count(), 4);

    dataset.invalidate_all();
    dataset.image(0, 0, 0).await.unwrap();
    assert_eq!(source.fetch_count(), 8);
}

#[tokio::test]
async fn test_shutdown_rejects_further_queries() {
    let source = Arc::new(PatternSource::new([32, 32, 1]));
    let dataset = dataset_over(Arc::clone(&source) as Arc<dyn TileSource>, [64, 64, 1], 1);

    dataset.image(0, 0, 0).await.unwrap();
    dataset.shutdown();

    let err = dataset.image(0, 0, 0).await.unwrap_err();
    assert_eq!(err, CacheError::ShuttingDown);
    let err = dataset.volatile_image(0, 0, 0).await.unwrap_err();
    assert_eq!(err, CacheError::ShuttingDown);
}
