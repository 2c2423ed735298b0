//! Image sharpness measurement.
//!
//! One metric is used everywhere a sharpness decision is made: focus search,
//! capture verification and quality gating all call [`laplacian_variance`],
//! so thresholds stay comparable across the pipeline.

use crate::types::Frame;

/// Convert RGB to luminance.
fn luminance(rgb: &[u8]) -> f32 {
    0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
}

/// Grayscale rendering of a frame as one luminance value per pixel.
pub fn grayscale(frame: &Frame) -> Vec<f32> {
    let pixel_count = (frame.width as usize) * (frame.height as usize);
    let mut gray = Vec::with_capacity(pixel_count);
    for idx in 0..pixel_count {
        let base = idx * 3;
        gray.push(luminance(&frame.data[base..base + 3]));
    }
    gray
}

/// Sharpness score: variance of the Laplacian-filtered grayscale image.
///
/// Uses the 4-connected Laplacian kernel over interior pixels. Higher means
/// sharper; a uniform frame scores 0. Frames smaller than 3x3 have no
/// interior and score 0.
pub fn laplacian_variance(frame: &Frame) -> f64 {
    let width = frame.width as usize;
    let height = frame.height as usize;

    if width < 3 || height < 3 {
        return 0.0;
    }

    let gray = grayscale(frame);
    let mut responses = Vec::with_capacity((width - 2) * (height - 2));

    for y in 1..(height - 1) {
        for x in 1..(width - 1) {
            let center = gray[y * width + x];
            let neighbors = gray[(y - 1) * width + x]
                + gray[(y + 1) * width + x]
                + gray[y * width + x - 1]
                + gray[y * width + x + 1];
            responses.push((neighbors - 4.0 * center) as f64);
        }
    }

    variance(&responses)
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_data::{checkerboard_frame, flat_frame};

    #[test]
    fn test_luminance_weighting() {
        let lum = luminance(&[100, 150, 200]);
        let expected = 0.299 * 100.0 + 0.587 * 150.0 + 0.114 * 200.0;
        assert!((lum - expected).abs() < 0.1);
    }

    #[test]
    fn test_flat_frame_has_zero_sharpness() {
        let frame = flat_frame(32, 32, 128);
        assert_eq!(laplacian_variance(&frame), 0.0);
    }

    #[test]
    fn test_checkerboard_sharper_than_flat() {
        let sharp = checkerboard_frame(32, 32, 120);
        let flat = flat_frame(32, 32, 128);
        assert!(laplacian_variance(&sharp) > laplacian_variance(&flat));
    }

    #[test]
    fn test_higher_contrast_scores_higher() {
        let strong = checkerboard_frame(32, 32, 120);
        let weak = checkerboard_frame(32, 32, 20);
        assert!(laplacian_variance(&strong) > laplacian_variance(&weak));
    }

    #[test]
    fn test_tiny_frame_scores_zero() {
        let frame = flat_frame(2, 2, 50);
        assert_eq!(laplacian_variance(&frame), 0.0);
    }
}
