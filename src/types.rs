//! Core types for background removal operations

use crate::error::{BgRemovalError, Result};
use image::{GrayImage, ImageFormat, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Result of one pass through the pipeline
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// The RGB image as loaded, untouched
    pub original: RgbImage,

    /// Original colors with the mask as alpha
    pub transparent: RgbaImage,

    /// The segmentation mask at the original resolution
    pub mask: SegmentationMask,

    /// Original image dimensions (width, height)
    pub original_dimensions: (u32, u32),

    /// Per-stage timings
    pub timings: ProcessingTimings,
}

impl RemovalResult {
    /// Result dimensions (width, height)
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.original_dimensions
    }

    /// Get processing timings
    #[must_use]
    pub fn timings(&self) -> &ProcessingTimings {
        &self.timings
    }

    /// Split into the `(original, transparent)` pair
    #[must_use]
    pub fn into_pair(self) -> (RgbImage, RgbaImage) {
        (self.original, self.transparent)
    }

    /// Save the transparent image as PNG with alpha channel
    ///
    /// # Errors
    /// - Encoding or file write failures
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.transparent
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| {
                BgRemovalError::output(format!("Failed to write PNG '{}': {e}", path.display()))
            })
    }

    /// Encode the transparent image as PNG bytes
    ///
    /// # Errors
    /// - Encoding failures
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        self.transparent.encode_png()
    }

    /// Human readable timing summary
    #[must_use]
    pub fn timing_summary(&self) -> String {
        let t = &self.timings;
        format!(
            "total {}ms (preprocess {}ms, inference {}ms, postprocess {}ms)",
            t.total_ms, t.preprocessing_ms, t.inference_ms, t.postprocessing_ms
        )
    }
}

/// PNG encoding for the image buffers produced by the pipeline
pub trait PngEncode {
    /// Encode as PNG bytes
    ///
    /// # Errors
    /// - Encoding failures
    fn encode_png(&self) -> Result<Vec<u8>>;
}

impl PngEncode for RgbImage {
    fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| BgRemovalError::output(format!("Failed to encode PNG: {e}")))?;
        Ok(buffer.into_inner())
    }
}

impl PngEncode for RgbaImage {
    fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| BgRemovalError::output(format!("Failed to encode PNG: {e}")))?;
        Ok(buffer.into_inner())
    }
}

/// Single-channel opacity mask in `[0, 255]`
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    image: GrayImage,
}

impl SegmentationMask {
    /// Wrap a grayscale image as a mask
    #[must_use]
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    /// Mask dimensions (width, height)
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Borrow the underlying grayscale image
    #[must_use]
    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    /// Take the underlying grayscale image
    #[must_use]
    pub fn into_image(self) -> GrayImage {
        self.image
    }

    /// Get mask statistics
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.image.as_raw().len();
        let foreground_pixels = self.image.as_raw().iter().filter(|&&v| v > 127).count();
        let foreground_ratio = if total_pixels == 0 {
            0.0
        } else {
            foreground_pixels as f32 / total_pixels as f32
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            foreground_ratio,
        }
    }

    /// Save mask as PNG
    ///
    /// # Errors
    /// - Encoding or file write failures
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

/// Statistics about a segmentation mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub foreground_ratio: f32,
}

/// Timing breakdown for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Model loading time, present only on the call that loaded the model
    pub model_load_ms: Option<u64>,

    /// Resize, normalization and tensor conversion
    pub preprocessing_ms: u64,

    /// Forward pass
    pub inference_ms: u64,

    /// Sigmoid, mask quantization, resize and compositing
    pub postprocessing_ms: u64,

    /// End-to-end time excluding model loading
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Share of the total spent in the forward pass
    #[must_use]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, Rgba};

    fn sample_result() -> RemovalResult {
        let original = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let transparent = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 128]));
        RemovalResult {
            original,
            transparent,
            mask: SegmentationMask::new(GrayImage::from_pixel(4, 3, Luma([128]))),
            original_dimensions: (4, 3),
            timings: ProcessingTimings {
                total_ms: 10,
                inference_ms: 5,
                ..ProcessingTimings::default()
            },
        }
    }

    #[test]
    fn test_png_bytes_decode_with_alpha() {
        let bytes = sample_result().to_png_bytes().unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn test_save_png() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("result.png");
        sample_result().save_png(&path).unwrap();
        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([10, 20, 30, 128]));
    }

    #[test]
    fn test_mask_statistics() {
        let mask = SegmentationMask::new(GrayImage::from_fn(4, 1, |x, _| Luma([x as u8 * 80])));
        let stats = mask.statistics();
        assert_eq!(stats.total_pixels, 4);
        assert_eq!(stats.foreground_pixels, 2);
        assert!((stats.foreground_ratio - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_timings() {
        let result = sample_result();
        assert!((result.timings().inference_ratio() - 0.5).abs() < f64::EPSILON);
        assert!(result.timing_summary().contains("inference 5ms"));
        assert_eq!(ProcessingTimings::default().inference_ratio(), 0.0);
    }

    #[test]
    fn test_into_pair() {
        let (original, transparent) = sample_result().into_pair();
        assert_eq!(original.dimensions(), transparent.dimensions());
    }
}
