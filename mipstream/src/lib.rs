//! Mipstream streams multi-resolution image volumes that are far too large
//! for main memory.
//!
//! The crate keeps a bounded set of decoded tiles resident, fetches missing
//! tiles through an asynchronous worker pool, and tells a renderer in which
//! order to draw and prefetch the levels of a mipmap pyramid:
//!
//! - [`pyramid`] describes the level geometry (dimensions, tile grids,
//!   level-to-base transforms).
//! - [`cache`] is the resident tile store with LRU eviction, per-tile job
//!   deduplication, and priority-ordered background fetching.
//! - [`ordering`] ranks pyramid levels for rendering and prefetch given the
//!   current screen transform.
//! - [`source`] fetches and decodes raw tile bytes, e.g. over HTTP.
//! - [`dataset`] ties the pieces together behind one facade.
//!
//! # Example
//!
//! ```ignore
//! use mipstream::dataset::{Dataset, DatasetConfig};
//! use mipstream::pyramid::PyramidModel;
//! use mipstream::source::{HttpSourceConfig, HttpTileSource, ReqwestClient};
//! use std::sync::Arc;
//!
//! let pyramid = Arc::new(PyramidModel::new([65536, 65536, 120], [512, 512, 1], 6)?);
//! let source = HttpTileSource::new(
//!     ReqwestClient::new()?,
//!     HttpSourceConfig::new("https://tiles.example.org/{time}/{setup}/{level}/{row}/{col}/{depth}.png", 512, 512),
//! );
//! let dataset = Dataset::new(
//!     DatasetConfig::new().with_num_timepoints(151).with_num_setups(2),
//!     pyramid,
//!     Arc::new(source),
//! )?;
//!
//! // Blocking full-resolution slab for analysis:
//! let img = dataset.image(0, 0, 3).await?;
//!
//! // Non-blocking view for interactive rendering:
//! let view = dataset.volatile_image(0, 0, 3).await?;
//! ```

pub mod cache;
pub mod coord;
pub mod dataset;
pub mod logging;
pub mod ordering;
pub mod pyramid;
pub mod source;
pub mod tile;

/// Current version of the mipstream library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
