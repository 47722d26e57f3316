//! Image input operations
//!
//! Keeps file, network and decoding concerns out of the pipeline. Every
//! source ends up as an `RgbImage`.

use crate::error::{BgRemovalError, Result};
use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use reqwest::Client;
use std::path::{Path, PathBuf};

/// Where an input image comes from
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Already decoded image
    Image(DynamicImage),
    /// Encoded image bytes (PNG, JPEG, ...)
    Bytes(Vec<u8>),
    /// Image file on disk
    Path(PathBuf),
    /// Remote image fetched over HTTP(S)
    Url(String),
}

impl ImageSource {
    /// Classify a string as a URL when it has an `http://` or `https://` scheme,
    /// otherwise as a local path
    ///
    /// ```rust
    /// use birefnet_bgremove::services::ImageSource;
    ///
    /// assert!(matches!(ImageSource::from_location("https://example.com/cat.jpg"), ImageSource::Url(_)));
    /// assert!(matches!(ImageSource::from_location("photos/cat.jpg"), ImageSource::Path(_)));
    /// ```
    #[must_use]
    pub fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::Url(location.to_string())
        } else {
            Self::Path(PathBuf::from(location))
        }
    }

    /// Short description used in logs
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Image(image) => format!("decoded image {}x{}", image.width(), image.height()),
            Self::Bytes(bytes) => format!("{} encoded bytes", bytes.len()),
            Self::Path(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
        }
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        Self::Image(image)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

/// Turns an `ImageSource` into RGB pixels
#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// Load and convert to 8-bit RGB
    ///
    /// # Errors
    /// - Unreadable file, network failure or non-success HTTP status
    /// - Unsupported or corrupt image data
    async fn load(&self, source: ImageSource) -> Result<RgbImage>;
}

/// Loader for local files, in-memory data and HTTP(S) URLs
#[derive(Debug, Clone)]
pub struct DefaultImageLoader {
    client: Client,
}

impl DefaultImageLoader {
    /// Create a loader with its own HTTP client
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client })
    }

    /// Create a loader around an existing HTTP client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| BgRemovalError::network_error(format!("Invalid URL '{url}'"), e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BgRemovalError::unsupported_format(format!(
                "URL scheme '{}' (only http and https are supported)",
                parsed.scheme()
            )));
        }

        log::debug!("Fetching image from {url}");
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to fetch {url}"), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("Failed to fetch {url}"),
                format!("HTTP {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to read body of {url}"), e))?;
        log::debug!("Fetched {} bytes from {url}", bytes.len());
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageLoader for DefaultImageLoader {
    async fn load(&self, source: ImageSource) -> Result<RgbImage> {
        match source {
            ImageSource::Image(image) => Ok(image.to_rgb8()),
            ImageSource::Bytes(bytes) => decode_blocking(move || load_image_from_bytes(&bytes)).await,
            ImageSource::Path(path) => decode_blocking(move || load_image_from_path(&path)).await,
            ImageSource::Url(url) => {
                let bytes = self.fetch(&url).await?;
                decode_blocking(move || load_image_from_bytes(&bytes)).await
            },
        }
    }
}

/// Decode and convert to RGB on the blocking pool, off the async workers
async fn decode_blocking<F>(decode: F) -> Result<RgbImage>
where
    F: FnOnce() -> Result<DynamicImage> + Send + 'static,
{
    tokio::task::spawn_blocking(move || decode().map(|image| image.to_rgb8()))
        .await
        .map_err(|e| BgRemovalError::internal(format!("Image decoding task failed: {e}")))?
}

/// Decode an image from encoded bytes, detecting the format from content
///
/// # Errors
/// - Empty input
/// - Unsupported or corrupt image data
pub fn load_image_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(BgRemovalError::unsupported_format("empty image data"));
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Load an image file, trying the extension first and falling back to content sniffing
///
/// # Errors
/// - File missing or unreadable
/// - Unsupported or corrupt image data
pub fn load_image_from_path(path: &Path) -> Result<DynamicImage> {
    if !path.exists() {
        return Err(BgRemovalError::file_io_error(
            "read image file",
            path,
            &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
        ));
    }

    match image::open(path) {
        Ok(image) => Ok(image),
        Err(extension_err) => {
            log::debug!(
                "Extension-based loading failed for {}: {extension_err}. Trying content-based detection.",
                path.display()
            );
            let data = std::fs::read(path)
                .map_err(|e| BgRemovalError::file_io_error("read image data", path, &e))?;
            image::load_from_memory(&data).map_err(|content_err| {
                log::debug!("Content-based detection failed: {content_err}");
                BgRemovalError::Image(extension_err)
            })
        },
    }
}
