//! Upload, URL and file entry points
//!
//! The three modes differ only in where the image comes from and what is
//! returned. All of them run [`run_pipeline`] with an [`OutputStrategy`].

use crate::{
    config::RemovalConfig,
    error::Result,
    processor::BackgroundRemovalProcessor,
    services::{ComparisonPair, DefaultImageLoader, ImageLoader, ImageSource, OutputStrategy, PngFile},
    types::RemovalResult,
};
use image::{RgbImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

/// Run the processor on one image and hand the result to `strategy`
///
/// # Errors
/// - Any pipeline error, unchanged
/// - Output errors from the strategy
pub fn run_pipeline<S: OutputStrategy>(
    processor: &mut BackgroundRemovalProcessor,
    image: &RgbImage,
    strategy: &S,
) -> Result<S::Output> {
    let result = processor.process(image)?;
    strategy.emit(result)
}

/// Background removal for in-memory uploads, remote URLs and files on disk
pub struct BackgroundRemover {
    processor: BackgroundRemovalProcessor,
    loader: Arc<dyn ImageLoader>,
}

impl BackgroundRemover {
    /// Create a remover for the given configuration with the default loader
    ///
    /// The model is loaded on first use.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - HTTP client construction failures
    pub fn new(config: RemovalConfig) -> Result<Self> {
        Self::with_processor(BackgroundRemovalProcessor::new(config)?)
    }

    /// Wrap an existing processor with the default loader
    ///
    /// # Errors
    /// - HTTP client construction failures
    pub fn with_processor(processor: BackgroundRemovalProcessor) -> Result<Self> {
        Ok(Self::with_loader(processor, Arc::new(DefaultImageLoader::new()?)))
    }

    /// Wrap an existing processor and loader
    #[must_use]
    pub fn with_loader(processor: BackgroundRemovalProcessor, loader: Arc<dyn ImageLoader>) -> Self {
        Self { processor, loader }
    }

    /// Load the model ahead of the first request
    ///
    /// # Errors
    /// - Model loading or backend failures
    pub fn initialize(&mut self) -> Result<()> {
        self.processor.initialize()
    }

    /// Load `source` and run the pipeline with `strategy`
    ///
    /// # Errors
    /// - Load errors for the source
    /// - Pipeline or output errors
    #[instrument(skip(self, source, strategy), fields(source = %source.describe()))]
    pub async fn process<S: OutputStrategy>(
        &mut self,
        source: ImageSource,
        strategy: &S,
    ) -> Result<S::Output> {
        let image = self.loader.load(source).await?;
        run_pipeline(&mut self.processor, &image, strategy)
    }

    /// Load `source` and return the full result with mask and timings
    ///
    /// # Errors
    /// - Load or pipeline errors
    pub async fn process_result(&mut self, source: ImageSource) -> Result<RemovalResult> {
        let image = self.loader.load(source).await?;
        self.processor.process(&image)
    }

    /// Upload mode: decoded image or encoded bytes in, `(original, transparent)` out
    ///
    /// # Errors
    /// - Undecodable input
    /// - Pipeline errors
    pub async fn process_upload(
        &mut self,
        source: impl Into<ImageSource>,
    ) -> Result<(RgbImage, RgbaImage)> {
        self.process(source.into(), &ComparisonPair).await
    }

    /// URL mode: fetch an image over HTTP(S), `(original, transparent)` out
    ///
    /// # Errors
    /// - Network failures or non-success status
    /// - Undecodable content
    /// - Pipeline errors
    pub async fn process_url(&mut self, url: &str) -> Result<(RgbImage, RgbaImage)> {
        self.process(ImageSource::Url(url.to_string()), &ComparisonPair)
            .await
    }

    /// File mode: read an image from disk and write `<basename>.png` next to it,
    /// or to `output` when given
    ///
    /// Returns the path written.
    ///
    /// # Errors
    /// - Unreadable input
    /// - Pipeline errors
    /// - Failures writing the PNG
    pub async fn process_file(&mut self, input: &Path, output: Option<&Path>) -> Result<PathBuf> {
        let strategy = match output {
            Some(path) => PngFile::at(path),
            None => PngFile::for_input(input),
        };
        let written = self
            .process(ImageSource::Path(input.to_path_buf()), &strategy)
            .await?;
        info!(input = %input.display(), output = %written.display(), "Wrote transparent PNG");
        Ok(written)
    }

    /// Underlying processor
    #[must_use]
    pub fn processor(&self) -> &BackgroundRemovalProcessor {
        &self.processor
    }

    /// Underlying processor, mutably
    pub fn processor_mut(&mut self) -> &mut BackgroundRemovalProcessor {
        &mut self.processor
    }

    /// Loader used for every source
    #[must_use]
    pub fn loader(&self) -> Arc<dyn ImageLoader> {
        Arc::clone(&self.loader)
    }

    /// Split into processor and loader
    #[must_use]
    pub fn into_parts(self) -> (BackgroundRemovalProcessor, Arc<dyn ImageLoader>) {
        (self.processor, self.loader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn mock_remover() -> BackgroundRemover {
        let processor = BackgroundRemovalProcessor::with_backend(
            RemovalConfig::default(),
            Box::new(MockBackend::with_size(16)),
        )
        .unwrap();
        BackgroundRemover::with_processor(processor).unwrap()
    }

    fn encoded(image: &RgbImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[tokio::test]
    async fn test_upload_returns_untouched_original() {
        let image = RgbImage::from_fn(30, 20, |x, y| Rgb([x as u8, y as u8, 200]));
        let mut remover = mock_remover();

        let (original, transparent) = remover.process_upload(encoded(&image)).await.unwrap();
        assert_eq!(original, image);
        assert_eq!(transparent.dimensions(), (30, 20));
        for (x, y, pixel) in transparent.enumerate_pixels() {
            assert_eq!(&pixel.0[..3], &image.get_pixel(x, y).0[..]);
        }
    }

    #[tokio::test]
    async fn test_file_mode_writes_png() {
        let temp = tempfile::TempDir::new().unwrap();
        let input = temp.path().join("butterfly.jpg");
        RgbImage::from_pixel(40, 24, Rgb([180, 120, 60]))
            .save_with_format(&input, ImageFormat::Jpeg)
            .unwrap();

        let mut remover = mock_remover();
        let written = remover.process_file(&input, None).await.unwrap();
        assert_eq!(written, temp.path().join("butterfly.png"));

        let decoded = image::open(&written).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!((decoded.width(), decoded.height()), (40, 24));
    }

    #[tokio::test]
    async fn test_missing_file_propagates() {
        let mut remover = mock_remover();
        let err = remover
            .process_file(Path::new("/no/such/input.jpg"), None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Input);
    }
}
