//! Level geometry of a mipmap pyramid.

use thiserror::Error;

use crate::coord::TileCoordinate;
use crate::pyramid::transform::Affine3;

/// Errors from pyramid construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PyramidError {
    /// The full-resolution image has a zero extent on some axis.
    #[error("image dimensions must be positive, got {0:?}")]
    EmptyImage([u64; 3]),

    /// The tile has a zero extent on some axis.
    #[error("tile dimensions must be positive, got {0:?}")]
    EmptyTile([u32; 3]),

    /// A pyramid must have at least one level.
    #[error("pyramid needs at least one level")]
    NoLevels,

    /// The requested level count halves the image away entirely.
    #[error("level {level} would be empty for image dimensions {dims:?}")]
    EmptyLevel {
        /// First level with a zero extent.
        level: u32,
        /// Full-resolution image dimensions.
        dims: [u64; 3],
    },
}

/// Geometry of one resolution level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDescriptor {
    /// Level index (0 = full resolution).
    pub level: u32,
    /// Downsampling factor per axis relative to level 0.
    pub downsample: [u32; 3],
    /// Image extent in pixels at this level.
    pub dims: [u64; 3],
    /// Nominal tile extent; edge tiles may be smaller.
    pub tile_dims: [u32; 3],
    /// Number of tiles per axis.
    pub grid_dims: [u64; 3],
    /// Maps this level's pixel coordinates to full-resolution coordinates.
    pub transform: Affine3,
}

/// Describes every resolution level of a tiled dataset.
///
/// Levels halve the x and y extent per step (integer floor division) while
/// z keeps full resolution. The level transform scales by the downsampling
/// factor and shifts by half the factor's spread so that a downsampled
/// pixel maps onto the center of the full-resolution pixels it summarizes.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidModel {
    base_dims: [u64; 3],
    tile_dims: [u32; 3],
    levels: Vec<LevelDescriptor>,
}

impl PyramidModel {
    /// Builds a pyramid of `num_levels` levels over a full-resolution image
    /// of `base_dims` pixels, tiled into `tile_dims` tiles.
    ///
    /// # Errors
    ///
    /// Rejects zero extents and level counts that produce an empty level.
    pub fn new(
        base_dims: [u64; 3],
        tile_dims: [u32; 3],
        num_levels: u32,
    ) -> Result<Self, PyramidError> {
        if base_dims.iter().any(|&d| d == 0) {
            return Err(PyramidError::EmptyImage(base_dims));
        }
        if tile_dims.iter().any(|&d| d == 0) {
            return Err(PyramidError::EmptyTile(tile_dims));
        }
        if num_levels == 0 {
            return Err(PyramidError::NoLevels);
        }

        let mut levels = Vec::with_capacity(num_levels as usize);
        for level in 0..num_levels {
            let dims = [
                base_dims[0].checked_shr(level).unwrap_or(0),
                base_dims[1].checked_shr(level).unwrap_or(0),
                base_dims[2],
            ];
            if dims[0] == 0 || dims[1] == 0 {
                return Err(PyramidError::EmptyLevel {
                    level,
                    dims: base_dims,
                });
            }

            let factor = 1u64 << level.min(63);
            let grid_dims = [
                dims[0].div_ceil(tile_dims[0] as u64),
                dims[1].div_ceil(tile_dims[1] as u64),
                dims[2].div_ceil(tile_dims[2] as u64),
            ];
            // A downsampled pixel sits at the center of the full-resolution
            // pixels it covers, hence the half-spread offset.
            let offset = 0.5 * (factor as f64 - 1.0);
            levels.push(LevelDescriptor {
                level,
                downsample: [factor as u32, factor as u32, 1],
                dims,
                tile_dims,
                grid_dims,
                transform: Affine3::scale_and_translate(
                    [factor as f64, factor as f64, 1.0],
                    [offset, offset, 0.0],
                ),
            });
        }

        Ok(Self {
            base_dims,
            tile_dims,
            levels,
        })
    }

    /// Full-resolution image extent in pixels.
    pub fn base_dims(&self) -> [u64; 3] {
        self.base_dims
    }

    /// Nominal tile extent, shared by all levels.
    pub fn tile_dims(&self) -> [u32; 3] {
        self.tile_dims
    }

    /// Number of resolution levels.
    pub fn num_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    /// All level descriptors, finest first.
    pub fn levels(&self) -> &[LevelDescriptor] {
        &self.levels
    }

    /// Descriptor of one level, or `None` if out of range.
    pub fn level(&self, level: u32) -> Option<&LevelDescriptor> {
        self.levels.get(level as usize)
    }

    /// Downsampling factors per level, finest first.
    pub fn resolutions(&self) -> Vec<[u32; 3]> {
        self.levels.iter().map(|l| l.downsample).collect()
    }

    /// Level-to-full-resolution transforms, finest first.
    pub fn transforms(&self) -> Vec<Affine3> {
        self.levels.iter().map(|l| l.transform).collect()
    }

    /// Returns true if `coord` addresses a tile inside `level`'s grid.
    pub fn contains(&self, level: u32, coord: TileCoordinate) -> bool {
        self.level(level).is_some_and(|desc| {
            (coord.col as u64) < desc.grid_dims[0]
                && (coord.row as u64) < desc.grid_dims[1]
                && (coord.depth as u64) < desc.grid_dims[2]
        })
    }

    /// Pixel extent of the tile at `coord`, cropped at the image border.
    pub fn cell_dims(&self, level: u32, coord: TileCoordinate) -> Option<[u32; 3]> {
        if !self.contains(level, coord) {
            return None;
        }
        let desc = self.level(level)?;
        let index = [coord.col as u64, coord.row as u64, coord.depth as u64];
        let mut dims = [0u32; 3];
        for axis in 0..3 {
            let tile = self.tile_dims[axis] as u64;
            let start = index[axis] * tile;
            dims[axis] = tile.min(desc.dims[axis] - start) as u32;
        }
        Some(dims)
    }

    /// Position of the tile's first pixel in level coordinates.
    pub fn cell_min(&self, level: u32, coord: TileCoordinate) -> Option<[i64; 3]> {
        if !self.contains(level, coord) {
            return None;
        }
        Some([
            coord.col as i64 * self.tile_dims[0] as i64,
            coord.row as i64 * self.tile_dims[1] as i64,
            coord.depth as i64 * self.tile_dims[2] as i64,
        ])
    }
}

/// Number of levels a pyramid can usefully have before a whole level fits
/// inside a single tile.
///
/// Counts how often the image can be halved while both the halved width
/// and height still exceed one tile.
pub fn max_levels(base_width: u64, base_height: u64, tile_width: u64, tile_height: u64) -> u32 {
    let mut width = base_width;
    let mut height = base_height;
    let mut levels = 1;
    loop {
        width >>= 1;
        height >>= 1;
        if width > tile_width && height > tile_height {
            levels += 1;
        } else {
            return levels;
        }
    }
}
