//! Image to tensor conversion for model input

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;

/// Converts RGB images into normalized NCHW tensors
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Resize to the model resolution and normalize into a `(1, 3, H, W)` tensor
    ///
    /// The resize ignores aspect ratio and uses bilinear filtering. Each channel
    /// is computed as `(v / 255 - mean[c]) / std[c]`.
    ///
    /// # Errors
    /// - Zero-sized input image
    /// - Invalid preprocessing configuration
    pub fn preprocess(image: &RgbImage, config: &PreprocessingConfig) -> Result<Array4<f32>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BgRemovalError::processing_stage_error(
                "preprocessing",
                "image has no pixels",
                Some(&format!("{width}x{height}")),
            ));
        }
        config.validate()?;

        let [target_width, target_height] = config.target_size;
        let resized = if (width, height) == (target_width, target_height) {
            image.clone()
        } else {
            image::imageops::resize(image, target_width, target_height, FilterType::Triangle)
        };

        Ok(Self::to_tensor(&resized, config))
    }

    fn to_tensor(image: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let mean = config.normalization_mean;
        let std = config.normalization_std;

        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Tensor was allocated with the image dimensions
        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (f32::from(pixel[c]) / 255.0 - mean[c]) / std[c];
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn small_config(size: u32) -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: [size, size],
            ..PreprocessingConfig::default()
        }
    }

    #[test]
    fn test_output_shape_ignores_aspect_ratio() {
        let image = RgbImage::from_pixel(40, 10, Rgb([10, 20, 30]));
        let tensor = ImagePreprocessor::preprocess(&image, &small_config(16)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);
    }

    #[test]
    fn test_normalization_of_known_pixel() {
        let image = RgbImage::from_pixel(4, 4, Rgb([255, 128, 0]));
        let tensor = ImagePreprocessor::preprocess(&image, &small_config(4)).unwrap();

        let expected_r = (1.0 - 0.485) / 0.229;
        let expected_g = (128.0 / 255.0 - 0.456) / 0.224;
        let expected_b = (0.0 - 0.406) / 0.225;

        assert!((tensor[[0, 0, 2, 2]] - expected_r).abs() < 1e-5);
        assert!((tensor[[0, 1, 2, 2]] - expected_g).abs() < 1e-5);
        assert!((tensor[[0, 2, 2, 2]] - expected_b).abs() < 1e-5);
    }

    #[test]
    fn test_default_resolution() {
        let image = RgbImage::from_pixel(3, 2, Rgb([0, 0, 0]));
        let tensor = ImagePreprocessor::preprocess(&image, &PreprocessingConfig::default()).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 1024, 1024]);
    }

    #[test]
    fn test_single_pixel_image() {
        let image = RgbImage::from_pixel(1, 1, Rgb([200, 100, 50]));
        let tensor = ImagePreprocessor::preprocess(&image, &small_config(8)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);
        assert!(tensor.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_sized_image_rejected() {
        let image = RgbImage::new(0, 5);
        let err = ImagePreprocessor::preprocess(&image, &small_config(8)).unwrap_err();
        assert!(matches!(err, BgRemovalError::Processing(_)));
    }
}
