//! Consumer-facing facade over cache, pyramid, and ordering.
//!
//! A [`Dataset`] owns one [`crate::cache::TileCache`] and answers image
//! queries for `(timepoint, setup, level)` slices. [`Dataset::image`]
//! waits for every tile of the slice, [`Dataset::volatile_image`] returns
//! immediately with whatever is resident and schedules the rest in the
//! background. Both return a [`CachedImage`], a pixel-addressable view
//! over the slice's cells.

mod core;
mod image;

pub use core::{Dataset, DatasetConfig};
pub use image::CachedImage;
