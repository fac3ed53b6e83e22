//! Source trait and fetch error types.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::coord::{TileCoordinate, ViewKey};

/// Errors a tile source can report.
///
/// Fetch errors are recorded on the failed cell and handed to every
/// blocking requester, so the type is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The server answered with a non-success HTTP status.
    #[error("tile server returned HTTP status {status}")]
    Http {
        /// Status code of the response.
        status: u16,
    },

    /// The request never produced a response (DNS, connect, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body was not a decodable image.
    #[error("failed to decode tile: {0}")]
    Decode(String),

    /// The decoded image does not cover the expected tile extent.
    #[error("unexpected tile dimensions: expected {expected:?}, got {actual:?}")]
    UnexpectedDimensions {
        /// Extent the pyramid expects for this tile.
        expected: [u32; 3],
        /// Extent the source actually delivered.
        actual: [u32; 3],
    },
}

/// A decoded tile as delivered by a source: packed ARGB pixels covering the
/// nominal tile extent.
///
/// Sources always deliver full nominal tiles; cropping edge tiles down to
/// the image border is the cache's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTile {
    /// Extent of the delivered pixel block per axis.
    pub dims: [u32; 3],
    /// Packed ARGB pixels, x-fastest.
    pub pixels: Vec<u32>,
}

impl RawTile {
    /// Wraps decoded pixels with their extent.
    pub fn new(dims: [u32; 3], pixels: Vec<u32>) -> Self {
        Self { dims, pixels }
    }

    /// Number of pixels `dims` describes.
    pub fn num_pixels(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }
}

/// Fetches and decodes one tile.
///
/// Implementations must be safe to call concurrently; the cache's worker
/// pool issues several fetches at once.
pub trait TileSource: Send + Sync + 'static {
    /// Fetches the tile at `coord` within `view`.
    ///
    /// # Returns
    ///
    /// The decoded tile at the source's nominal tile extent.
    fn fetch(
        &self,
        view: ViewKey,
        coord: TileCoordinate,
    ) -> Pin<Box<dyn Future<Output = Result<RawTile, FetchError>> + Send + '_>>;
}
