//! Pixel-addressable views over one slice's cells.

use std::sync::Arc;

use crate::coord::{TileCoordinate, ViewKey};
use crate::tile::Cell;

/// One `(timepoint, setup, level)` slice backed by cache cells.
///
/// The view holds its cells, which pins them against eviction for the
/// view's lifetime. Tiles that finish loading after the view was created
/// become visible through it; [`CachedImage::get`] reads whatever is
/// valid at call time.
#[derive(Debug, Clone)]
pub struct CachedImage {
    view: ViewKey,
    dims: [u64; 3],
    tile_dims: [u32; 3],
    grid_dims: [u64; 3],
    /// Row-major tile grid, column fastest, then row, then depth.
    cells: Vec<Arc<Cell>>,
}

impl CachedImage {
    pub(crate) fn new(
        view: ViewKey,
        dims: [u64; 3],
        tile_dims: [u32; 3],
        grid_dims: [u64; 3],
        cells: Vec<Arc<Cell>>,
    ) -> Self {
        debug_assert_eq!(
            cells.len() as u64,
            grid_dims[0] * grid_dims[1] * grid_dims[2]
        );
        Self {
            view,
            dims,
            tile_dims,
            grid_dims,
            cells,
        }
    }

    /// The slice this view shows.
    pub fn view(&self) -> ViewKey {
        self.view
    }

    /// Image extent in pixels at this view's level.
    pub fn dims(&self) -> [u64; 3] {
        self.dims
    }

    /// Nominal tile extent; edge tiles may be smaller.
    pub fn tile_dims(&self) -> [u32; 3] {
        self.tile_dims
    }

    /// Number of tiles per axis.
    pub fn grid_dims(&self) -> [u64; 3] {
        self.grid_dims
    }

    /// All cells of the slice in grid order.
    pub fn cells(&self) -> &[Arc<Cell>] {
        &self.cells
    }

    /// The cell covering `coord`, if the coordinate is on the grid.
    pub fn cell_at(&self, coord: TileCoordinate) -> Option<&Arc<Cell>> {
        let [cols, rows, depths] = self.grid_dims;
        let (col, row, depth) = (coord.col as u64, coord.row as u64, coord.depth as u64);
        if col >= cols || row >= rows || depth >= depths {
            return None;
        }
        self.cells.get(((depth * rows + row) * cols + col) as usize)
    }

    /// Reads one pixel in level-local coordinates.
    ///
    /// `None` when the coordinate is outside the image or the covering
    /// tile has not loaded yet.
    pub fn get(&self, x: u64, y: u64, z: u64) -> Option<u32> {
        if x >= self.dims[0] || y >= self.dims[1] || z >= self.dims[2] {
            return None;
        }
        let [tile_w, tile_h, tile_d] = self.tile_dims.map(u64::from);
        let coord = TileCoordinate::new(
            (x / tile_w) as u32,
            (y / tile_h) as u32,
            (z / tile_d) as u32,
        );
        let cell = self.cell_at(coord)?;
        let data = cell.data()?;
        // Edge cells are cropped, so the row stride is the cell's own
        // width, not the nominal tile width.
        let [cell_w, cell_h, _] = cell.dims().map(u64::from);
        let offset = ((z % tile_d) * cell_h + (y % tile_h)) * cell_w + (x % tile_w);
        data.get(offset as usize).copied()
    }

    /// True when every tile of the slice has loaded.
    pub fn is_fully_loaded(&self) -> bool {
        self.cells.iter().all(|cell| cell.is_valid())
    }

    /// Number of tiles that have loaded so far.
    pub fn loaded_tiles(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_valid()).count()
    }
}
