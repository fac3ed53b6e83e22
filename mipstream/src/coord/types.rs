//! Tile addressing types.

use std::fmt;

/// Identifies one view of the dataset: a timepoint, a setup (channel or
/// angle), and a resolution level of the mipmap pyramid.
///
/// Level 0 is the finest resolution; higher levels are coarser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey {
    /// Timepoint index (0-based).
    pub timepoint: u32,
    /// Setup index (0-based), e.g. a channel or acquisition angle.
    pub setup: u32,
    /// Resolution level (0 = full resolution).
    pub level: u32,
}

impl ViewKey {
    /// Creates a view key.
    pub fn new(timepoint: u32, setup: u32, level: u32) -> Self {
        Self {
            timepoint,
            setup,
            level,
        }
    }

    /// Returns the same view at a different resolution level.
    pub fn at_level(&self, level: u32) -> Self {
        Self { level, ..*self }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}/s{}/l{}", self.timepoint, self.setup, self.level)
    }
}

/// Position of a tile within the tile grid of one resolution level.
///
/// Coordinates count whole tiles, not pixels: tile `(col, row, depth)`
/// covers pixels starting at `(col * tile_w, row * tile_h, depth * tile_d)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoordinate {
    /// Column index along the x axis.
    pub col: u32,
    /// Row index along the y axis.
    pub row: u32,
    /// Slab index along the z axis.
    pub depth: u32,
}

impl TileCoordinate {
    /// Creates a tile coordinate.
    pub fn new(col: u32, row: u32, depth: u32) -> Self {
        Self { col, row, depth }
    }

    /// Creates a tile coordinate in the first z slab.
    ///
    /// Convenience for planar (2D) datasets where `depth` is always 0.
    pub fn planar(col: u32, row: u32) -> Self {
        Self::new(col, row, 0)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.col, self.row, self.depth)
    }
}

/// Globally unique address of one tile: which view it belongs to and where
/// it sits in that view's tile grid.
///
/// `TileKey` is the identity used by the cache for residency, job
/// deduplication, and eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// The view (timepoint, setup, level) the tile belongs to.
    pub view: ViewKey,
    /// Grid position within the view.
    pub coord: TileCoordinate,
}

impl TileKey {
    /// Creates a tile key.
    pub fn new(view: ViewKey, coord: TileCoordinate) -> Self {
        Self { view, coord }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.view, self.coord)
    }
}
