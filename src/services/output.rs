//! What the adapters hand back once the pipeline has run

use crate::{
    error::{BgRemovalError, Result},
    types::RemovalResult,
};
use image::{RgbImage, RgbaImage};
use std::path::{Path, PathBuf};

/// Turns a pipeline result into the value an entry point returns
pub trait OutputStrategy {
    /// Value produced for the caller
    type Output;

    /// Consume the result
    ///
    /// # Errors
    /// - Failures writing the result
    fn emit(&self, result: RemovalResult) -> Result<Self::Output>;
}

/// Returns `(original, transparent)` for side-by-side display
#[derive(Debug, Clone, Copy, Default)]
pub struct ComparisonPair;

impl OutputStrategy for ComparisonPair {
    type Output = (RgbImage, RgbaImage);

    fn emit(&self, result: RemovalResult) -> Result<Self::Output> {
        Ok(result.into_pair())
    }
}

/// Writes the transparent image as PNG and returns the written path
#[derive(Debug, Clone)]
pub struct PngFile {
    path: PathBuf,
}

impl PngFile {
    /// Write next to the input as `<basename>.png`
    #[must_use]
    pub fn for_input(input: &Path) -> Self {
        Self {
            path: derive_output_path(input),
        }
    }

    /// Write to an explicit location
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputStrategy for PngFile {
    type Output = PathBuf;

    fn emit(&self, result: RemovalResult) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BgRemovalError::output(format!(
                    "Failed to create output directory '{}': {e}",
                    parent.display()
                ))
            })?;
        }

        result.save_png(&self.path)?;
        log::info!("Saved {}", self.path.display());
        Ok(self.path.clone())
    }
}

/// `<dir>/<stem>.png` for an input path; a `.png` input maps onto itself
///
/// ```rust
/// use birefnet_bgremove::services::derive_output_path;
/// use std::path::Path;
///
/// assert_eq!(derive_output_path(Path::new("shots/butterfly.jpg")), Path::new("shots/butterfly.png"));
/// ```
#[must_use]
pub fn derive_output_path(input: &Path) -> PathBuf {
    input.with_extension("png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProcessingTimings, SegmentationMask};
    use image::{GrayImage, Luma, Rgb, Rgba};

    fn result(width: u32, height: u32) -> RemovalResult {
        RemovalResult {
            original: RgbImage::from_pixel(width, height, Rgb([9, 8, 7])),
            transparent: RgbaImage::from_pixel(width, height, Rgba([9, 8, 7, 40])),
            mask: SegmentationMask::new(GrayImage::from_pixel(width, height, Luma([40]))),
            original_dimensions: (width, height),
            timings: ProcessingTimings::default(),
        }
    }

    #[test]
    fn test_derive_output_path() {
        assert_eq!(
            derive_output_path(Path::new("/data/butterfly.jpg")),
            PathBuf::from("/data/butterfly.png")
        );
        assert_eq!(
            derive_output_path(Path::new("photo.webp")),
            PathBuf::from("photo.png")
        );
        assert_eq!(derive_output_path(Path::new("noext")), PathBuf::from("noext.png"));
        assert_eq!(derive_output_path(Path::new("a.png")), PathBuf::from("a.png"));
    }

    #[test]
    fn test_comparison_pair() {
        let (original, transparent) = ComparisonPair.emit(result(3, 2)).unwrap();
        assert_eq!(original.get_pixel(0, 0), &Rgb([9, 8, 7]));
        assert_eq!(transparent.get_pixel(0, 0)[3], 40);
    }

    #[test]
    fn test_png_file_writes_rgba() {
        let temp = tempfile::TempDir::new().unwrap();
        let strategy = PngFile::for_input(&temp.path().join("nested/butterfly.jpg"));
        let written = strategy.emit(result(6, 5)).unwrap();

        assert_eq!(written, temp.path().join("nested/butterfly.png"));
        let decoded = image::open(&written).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!((decoded.width(), decoded.height()), (6, 5));
    }

    #[test]
    fn test_png_file_override() {
        let temp = tempfile::TempDir::new().unwrap();
        let target = temp.path().join("custom.png");
        let written = PngFile::at(&target).emit(result(2, 2)).unwrap();
        assert_eq!(written, target);
        assert!(target.exists());
    }
}
