#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # BiRefNet Background Removal
//!
//! Background removal with the BiRefNet dichotomous segmentation model,
//! exported to ONNX and run through ONNX Runtime or Tract.
//!
//! One pipeline is shared by every entry point:
//!
//! 1. Load the image and convert it to 8-bit RGB
//! 2. Resize to 1024×1024 and normalize with ImageNet statistics
//! 3. Run the model and take its final output map
//! 4. Sigmoid, quantize to an 8-bit mask, resize back to the input size
//! 5. Compose a new RGBA image: original colors, mask as alpha
//!
//! ## Modes
//!
//! [`BackgroundRemover`] exposes the pipeline three ways:
//!
//! - [`process_upload`](BackgroundRemover::process_upload): decoded image or
//!   encoded bytes in, `(original, transparent)` out
//! - [`process_url`](BackgroundRemover::process_url): remote image in,
//!   `(original, transparent)` out
//! - [`process_file`](BackgroundRemover::process_file): file in,
//!   `<basename>.png` written and its path returned
//!
//! ```rust,no_run
//! use birefnet_bgremove::{BackgroundRemover, ModelDownloader, RemovalConfig};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Fetch the default model into the cache once
//! ModelDownloader::new()?
//!     .download_model(birefnet_bgremove::ModelCache::get_default_model_url(), false)
//!     .await?;
//!
//! let mut remover = BackgroundRemover::new(RemovalConfig::default())?;
//! let written = remover.process_file(Path::new("butterfly.jpg"), None).await?;
//! assert_eq!(written, Path::new("butterfly.png"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA and `CoreML` providers
//! - `tract` (default): pure Rust CPU backend
//! - `cli` (default): the `birefnet-bgremove` binary and tracing setup
//! - `web` (default): axum HTTP API (`serve` subcommand)
//! - `tracing-json`: JSON log output
//! - `webp-support` (default): WebP input

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod remover;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;
#[cfg(feature = "web")]
pub mod web;

use tokio::io::AsyncRead;

pub use backends::*;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{BackendType, ExecutionProvider, RemovalConfig, RemovalConfigBuilder};
pub use download::{parse_huggingface_url, validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, ErrorCategory, Result};
pub use inference::InferenceBackend;
pub use models::{ModelInfo, ModelManager, ModelSource, ModelSpec, PreprocessingConfig};
pub use processor::{BackendFactory, BackgroundRemovalProcessor, DefaultBackendFactory};
pub use remover::{run_pipeline, BackgroundRemover};
pub use services::{
    derive_output_path, ComparisonPair, DefaultImageLoader, ImageLoader, ImageSource,
    OutputStrategy, PngFile,
};
pub use types::{ProcessingTimings, RemovalResult, SegmentationMask};
pub use utils::{
    compose_alpha, probability_map_to_mask, resize_mask, sigmoid, ExecutionProviderManager,
    ImagePreprocessor, ModelSpecParser, ProviderInfo,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};

/// Remove the background of an already decoded image
///
/// Builds a processor for `config`, so the model is loaded on every call.
/// Keep a [`BackgroundRemover`] around to process several images.
///
/// ```rust,no_run
/// use birefnet_bgremove::{remove_background_from_image, RemovalConfig};
///
/// # async fn example(img: image::DynamicImage) -> anyhow::Result<()> {
/// let result = remove_background_from_image(img, &RemovalConfig::default()).await?;
/// result.save_png("output.png")?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_image(
    image: image::DynamicImage,
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    let mut remover = BackgroundRemover::new(config.clone())?;
    remover.process_result(ImageSource::Image(image)).await
}

/// Remove the background of an encoded image (PNG, JPEG, WebP, ...)
pub async fn remove_background_from_bytes(
    image_bytes: &[u8],
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    let mut remover = BackgroundRemover::new(config.clone())?;
    remover
        .process_result(ImageSource::Bytes(image_bytes.to_vec()))
        .await
}

/// Remove the background of an image read from an async stream
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer)
        .await
        .map_err(|e| BgRemovalError::file_io_error("read image stream", "<reader>", &e))?;

    remove_background_from_bytes(&buffer, config).await
}
