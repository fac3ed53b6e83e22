//! HTTP tile source with a mockable client abstraction.

use std::future::Future;

use tracing::{debug, trace, warn};

use crate::coord::{TileCoordinate, ViewKey};
use crate::source::types::{FetchError, RawTile, TileSource};

/// Default User-Agent string for tile requests.
/// Some tile servers reject requests without a User-Agent.
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Trait for asynchronous HTTP GET operations.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling mock HTTP clients in tests.
pub trait AsyncHttpClient: Send + Sync {
    /// Performs an async HTTP GET request.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    ///
    /// # Returns
    ///
    /// The response body as bytes or an error.
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Async HTTP client implementation using reqwest.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with default configuration.
    ///
    /// Tuned for fetching many small tiles in parallel:
    /// - Large connection pool with high idle limits
    /// - TCP keepalive to maintain warm connections
    /// - TCP nodelay for reduced latency
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom request timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(DEFAULT_USER_AGENT)
            // Connection pooling - keep many connections alive for parallel requests
            .pool_max_idle_per_host(128)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            // TCP optimizations
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl AsyncHttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        trace!(url = url, "HTTP GET request starting");

        let response = match self.client.get(url).send().await {
            Ok(resp) => {
                debug!(
                    url = url,
                    status = resp.status().as_u16(),
                    "HTTP response received"
                );
                resp
            }
            Err(e) => {
                warn!(
                    url = url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                return Err(FetchError::Transport(format!("request failed: {}", e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = url, status = status.as_u16(), "HTTP error status");
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Transport(format!("failed to read response: {}", e)))
    }
}

/// Configuration for an [`HttpTileSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// URL template with `{time}`, `{setup}`, `{level}`, `{row}`, `{col}`
    /// and `{depth}` placeholders.
    pub url_template: String,
    /// Nominal tile width the server delivers.
    pub tile_width: u32,
    /// Nominal tile height the server delivers.
    pub tile_height: u32,
}

impl HttpSourceConfig {
    /// Creates a source configuration.
    pub fn new(url_template: impl Into<String>, tile_width: u32, tile_height: u32) -> Self {
        Self {
            url_template: url_template.into(),
            tile_width,
            tile_height,
        }
    }
}

/// Tile source that downloads image tiles over HTTP and decodes them into
/// packed ARGB pixels.
///
/// One tile is one image file on the server; the URL is derived from the
/// tile address via the configured template. The server is expected to
/// deliver full nominal-size tiles even at the image border.
pub struct HttpTileSource<C: AsyncHttpClient> {
    client: C,
    config: HttpSourceConfig,
}

impl<C: AsyncHttpClient> HttpTileSource<C> {
    /// Creates a tile source from an HTTP client and a configuration.
    pub fn new(client: C, config: HttpSourceConfig) -> Self {
        Self { client, config }
    }

    /// Expands the URL template for one tile.
    fn build_url(&self, view: ViewKey, coord: TileCoordinate) -> String {
        self.config
            .url_template
            .replace("{time}", &view.timepoint.to_string())
            .replace("{setup}", &view.setup.to_string())
            .replace("{level}", &view.level.to_string())
            .replace("{row}", &coord.row.to_string())
            .replace("{col}", &coord.col.to_string())
            .replace("{depth}", &coord.depth.to_string())
    }

    async fn fetch_tile(
        &self,
        view: ViewKey,
        coord: TileCoordinate,
    ) -> Result<RawTile, FetchError> {
        let url = self.build_url(view, coord);
        let bytes = self.client.get(&url).await?;
        let (width, height, pixels) = decode_argb(&bytes)?;

        if width != self.config.tile_width || height != self.config.tile_height {
            return Err(FetchError::UnexpectedDimensions {
                expected: [self.config.tile_width, self.config.tile_height, 1],
                actual: [width, height, 1],
            });
        }

        trace!(url = url, width, height, "tile decoded");
        Ok(RawTile::new([width, height, 1], pixels))
    }
}

impl<C: AsyncHttpClient + 'static> TileSource for HttpTileSource<C> {
    fn fetch(
        &self,
        view: ViewKey,
        coord: TileCoordinate,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<RawTile, FetchError>> + Send + '_>> {
        Box::pin(self.fetch_tile(view, coord))
    }
}

/// Decodes an encoded image (PNG, JPEG, ...) into packed ARGB pixels.
fn decode_argb(bytes: &[u8]) -> Result<(u32, u32, Vec<u32>), FetchError> {
    let image = image::load_from_memory(bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        pixels.push(u32::from_be_bytes([a, r, g, b]));
    }
    Ok((width, height, pixels))
}
