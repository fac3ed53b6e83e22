//! Coordinate and key types for addressing tiles in a mipmap pyramid.
//!
//! Every cached tile is addressed by a [`TileKey`], which combines the view
//! it belongs to ([`ViewKey`]: timepoint, setup, resolution level) with its
//! position in that level's tile grid ([`TileCoordinate`]).

mod types;

pub use types::{TileCoordinate, TileKey, ViewKey};
