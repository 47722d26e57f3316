//! Logits to alpha: sigmoid, mask quantization, resize and compositing

use crate::{
    error::{BgRemovalError, Result},
    types::SegmentationMask,
};
use image::{imageops::FilterType, GrayImage, RgbImage, RgbaImage};
use ndarray::Array4;

/// Element-wise logistic function
#[must_use]
pub fn sigmoid(logits: &Array4<f32>) -> Array4<f32> {
    logits.mapv(|x| 1.0 / (1.0 + (-x).exp()))
}

/// Quantize a `(1, 1, H, W)` probability map into an 8-bit mask
///
/// Values are clamped to `[0, 1]`, scaled by 255 and truncated.
///
/// # Errors
/// - Batch or channel dimension other than 1
/// - Empty spatial dimensions
pub fn probability_map_to_mask(probabilities: &Array4<f32>) -> Result<SegmentationMask> {
    let (batch, channels, height, width) = probabilities.dim();
    if batch != 1 || channels != 1 {
        return Err(BgRemovalError::processing_stage_error(
            "postprocessing",
            &format!("expected a single-channel map with batch 1, got ({batch}, {channels}, {height}, {width})"),
            None,
        ));
    }
    if height == 0 || width == 0 {
        return Err(BgRemovalError::processing("Model returned an empty probability map"));
    }

    let data: Vec<u8> = probabilities
        .iter()
        .map(|&p| {
            let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
            (p * 255.0) as u8
        })
        .collect();

    let mask = GrayImage::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| BgRemovalError::internal("Mask buffer does not match its dimensions"))?;
    Ok(SegmentationMask::new(mask))
}

/// Bilinear resize of a mask to `width`×`height`
///
/// Same filter as the forward resize, so upsampled edges never overshoot the
/// predicted values.
#[must_use]
pub fn resize_mask(mask: &SegmentationMask, width: u32, height: u32) -> SegmentationMask {
    if mask.dimensions() == (width, height) {
        return mask.clone();
    }
    SegmentationMask::new(image::imageops::resize(
        mask.as_image(),
        width,
        height,
        FilterType::Triangle,
    ))
}

/// Build a new RGBA image with the original colors and the mask as alpha
///
/// # Errors
/// - Mask dimensions differ from the image dimensions
pub fn compose_alpha(image: &RgbImage, mask: &SegmentationMask) -> Result<RgbaImage> {
    if image.dimensions() != mask.dimensions() {
        let (iw, ih) = image.dimensions();
        let (mw, mh) = mask.dimensions();
        return Err(BgRemovalError::processing_stage_error(
            "compositing",
            &format!("mask is {mw}x{mh} but image is {iw}x{ih}"),
            None,
        ));
    }

    let alpha = mask.as_image();
    Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        image::Rgba([r, g, b, alpha.get_pixel(x, y)[0]])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_sigmoid_values() {
        let logits = Array4::from_shape_vec((1, 1, 1, 3), vec![0.0, 100.0, -100.0]).unwrap();
        let probs = sigmoid(&logits);
        assert!((probs[[0, 0, 0, 0]] - 0.5).abs() < 1e-6);
        assert!((probs[[0, 0, 0, 1]] - 1.0).abs() < 1e-6);
        assert!(probs[[0, 0, 0, 2]].abs() < 1e-6);
    }

    #[test]
    fn test_quantization_truncates() {
        let probs =
            Array4::from_shape_vec((1, 1, 1, 4), vec![0.0, 0.5, 1.0, 1.5]).unwrap();
        let mask = probability_map_to_mask(&probs).unwrap();
        let values: Vec<u8> = mask.as_image().pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![0, 127, 255, 255]);
    }

    #[test]
    fn test_mask_requires_single_channel() {
        let probs = Array4::<f32>::zeros((1, 2, 4, 4));
        assert!(probability_map_to_mask(&probs).is_err());
        let probs = Array4::<f32>::zeros((2, 1, 4, 4));
        assert!(probability_map_to_mask(&probs).is_err());
    }

    #[test]
    fn test_resize_mask_to_original() {
        let mask = SegmentationMask::new(GrayImage::from_pixel(16, 16, Luma([200])));
        let resized = resize_mask(&mask, 7, 3);
        assert_eq!(resized.dimensions(), (7, 3));
        assert!(resized.as_image().pixels().all(|p| p[0] == 200));

        let single = resize_mask(&mask, 1, 1);
        assert_eq!(single.dimensions(), (1, 1));
    }

    #[test]
    fn test_resize_mask_is_bilinear() {
        let mask = SegmentationMask::new(GrayImage::from_fn(4, 1, |x, _| {
            Luma([if x < 2 { 100 } else { 200 }])
        }));
        let resized = resize_mask(&mask, 16, 1);

        let row: Vec<u8> = resized.as_image().pixels().map(|p| p[0]).collect();
        assert!(row.iter().all(|&v| (100..=200).contains(&v)), "{row:?}");
        assert!(row.windows(2).all(|w| w[0] <= w[1]), "{row:?}");
        assert!(row.iter().any(|&v| v > 100 && v < 200), "{row:?}");
    }

    #[test]
    fn test_compose_keeps_rgb() {
        let image = RgbImage::from_fn(3, 2, |x, y| Rgb([x as u8 * 40, y as u8 * 90, 7]));
        let mask = SegmentationMask::new(GrayImage::from_fn(3, 2, |x, _| Luma([x as u8 * 100])));

        let rgba = compose_alpha(&image, &mask).unwrap();
        for (x, y, pixel) in rgba.enumerate_pixels() {
            let rgb = image.get_pixel(x, y);
            assert_eq!(&pixel.0[..3], &rgb.0[..]);
            assert_eq!(pixel[3], x as u8 * 100);
        }
    }

    #[test]
    fn test_compose_rejects_mismatched_sizes() {
        let image = RgbImage::new(4, 4);
        let mask = SegmentationMask::new(GrayImage::new(4, 3));
        assert!(compose_alpha(&image, &mask).is_err());
    }
}
