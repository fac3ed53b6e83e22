//! Mipmap pyramid geometry.
//!
//! A [`PyramidModel`] describes every resolution level of a dataset: its
//! pixel dimensions, its tile grid, the downsampling factors relative to
//! the full-resolution image, and the affine transform that maps the
//! level's pixel coordinates back into full-resolution coordinates.
//!
//! Levels are power-of-two downsampled in x and y only; z keeps full
//! resolution, which matches how section-based microscopy volumes are
//! published.

mod model;
mod transform;

pub use model::{max_levels, LevelDescriptor, PyramidError, PyramidModel};
pub use transform::Affine3;
