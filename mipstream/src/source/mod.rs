//! Tile sources: where raw pixel data comes from.
//!
//! A [`TileSource`] turns a tile address into decoded, packed ARGB pixels.
//! The cache never talks to the network itself; it hands every fetch to
//! the source injected at construction time, which keeps transport
//! concerns (HTTP, retries at the proxy, authentication) out of the
//! caching core and makes the whole stack testable with mock sources.
//!
//! [`HttpTileSource`] is the production implementation: it expands a URL
//! template per tile, downloads the image over HTTP, and decodes it.

mod http;
mod types;

pub use http::{AsyncHttpClient, HttpSourceConfig, HttpTileSource, ReqwestClient};
pub use types::{FetchError, RawTile, TileSource};

#[cfg(test)]
pub use http::tests::MockHttpClient;
