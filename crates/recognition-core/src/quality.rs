//! Pure, deterministic image-quality scoring.

use image::{DynamicImage, GenericImageView, GrayImage};
use imageproc::edges::canny;
use imageproc::filter::filter3x3;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};

use crate::types::ImageQuality;

const BLUR_CALIBRATION: f32 = 500.0;
const CONTRAST_CALIBRATION: f32 = 1000.0;
const NOISE_CALIBRATION: f32 = 10.0;
const SKEW_THRESHOLD_DEGREES: f32 = 5.0;
const MAX_LINE_ANGLE_DEGREES: f32 = 45.0;

/// 3x3 discrete Laplacian kernel.
const LAPLACIAN_KERNEL: [i32; 9] = [0, 1, 0, 1, -4, 1, 0, 1, 0];

pub struct QualityAssessor;

impl Default for QualityAssessor {
    fn default() -> Self {
        Self
    }
}

impl QualityAssessor {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(&self, image: &DynamicImage) -> ImageQuality {
        let gray = image.to_luma8();
        let laplacian = filter3x3(&gray, &LAPLACIAN_KERNEL);
        let values: Vec<f32> = laplacian.pixels().map(|p| p[0] as f32).collect();

        let blur_score = (laplacian_variance(&values) / BLUR_CALIBRATION).clamp(0.0, 1.0);
        let contrast_score = (histogram_std(&gray) / CONTRAST_CALIBRATION).clamp(0.0, 1.0);
        let brightness_score = (mean_intensity(&gray) / 255.0).clamp(0.0, 1.0);
        let noise_level = (median_abs(&values) / NOISE_CALIBRATION).clamp(0.0, 1.0);
        let is_skewed = detect_skew(&gray);

        ImageQuality { blur_score, contrast_score, brightness_score, noise_level, is_skewed }
    }
}

fn laplacian_variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32
}

fn histogram_std(gray: &GrayImage) -> f32 {
    let mut histogram = [0u32; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }
    let total: u32 = histogram.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let mean = histogram
        .iter()
        .enumerate()
        .map(|(bin, count)| bin as f64 * *count as f64)
        .sum::<f64>()
        / total as f64;
    let variance = histogram
        .iter()
        .enumerate()
        .map(|(bin, count)| (bin as f64 - mean).powi(2) * *count as f64)
        .sum::<f64>()
        / total as f64;
    variance.sqrt() as f32
}

fn mean_intensity(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let sum: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    sum as f32 / (w * h) as f32
}

fn median_abs(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut abs_values: Vec<f32> = values.iter().map(|v| v.abs()).collect();
    abs_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = abs_values.len() / 2;
    if abs_values.len() % 2 == 0 {
        (abs_values[mid - 1] + abs_values[mid]) / 2.0
    } else {
        abs_values[mid]
    }
}

/// Canny edges, probabilistic-style Hough line detection, median angle of
/// near-horizontal lines. `imageproc`'s Hough transform reports polar lines
/// `(r, angle_in_degrees)`, where `angle_in_degrees` is the normal direction;
/// the line's own direction is perpendicular to it.
fn detect_skew(gray: &GrayImage) -> bool {
    let edges = canny(gray, 50.0, 150.0);
    let lines = detect_lines(
        &edges,
        LineDetectionOptions { vote_threshold: 100, suppression_radius: 8 },
    );

    let angles: Vec<f32> = lines
        .iter()
        .filter_map(line_direction_degrees)
        .filter(|angle| angle.abs() < MAX_LINE_ANGLE_DEGREES)
        .collect();

    if angles.is_empty() {
        return false;
    }

    median(&angles).abs() > SKEW_THRESHOLD_DEGREES
}

/// Converts a polar line's normal angle into a signed line-direction angle
/// in `(-90, 90]` degrees, analogous to `atan2(dy, dx)` over a line segment.
fn line_direction_degrees(line: &PolarLine) -> Option<f32> {
    let direction = (line.angle_in_degrees as f32 + 90.0) % 180.0;
    Some(if direction > 90.0 { direction - 180.0 } else { direction })
}

fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbImage};

    #[test]
    fn blank_image_has_low_blur_score_and_midrange_brightness() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 80, image::Rgb([128, 128, 128])));
        let quality = QualityAssessor::new().assess(&img);
        assert!(quality.blur_score < 0.05, "blank image should score as blurry");
        assert!((quality.brightness_score - 0.50).abs() < 0.02);
        assert!(!quality.is_skewed);
    }

    #[test]
    fn checkerboard_image_has_higher_blur_score_than_blank() {
        let mut gray = GrayImage::new(64, 64);
        for (x, y, pixel) in gray.enumerate_pixels_mut() {
            let on = (x / 8 + y / 8) % 2 == 0;
            *pixel = Luma([if on { 255 } else { 0 }]);
        }
        let checkerboard = QualityAssessor::new().assess(&DynamicImage::ImageLuma8(gray));
        let blank = QualityAssessor::new()
            .assess(&DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([128]))));
        assert!(checkerboard.blur_score > blank.blur_score);
    }

    #[test]
    fn all_scores_are_clipped_to_unit_interval() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 50, Luma([255])));
        let quality = QualityAssessor::new().assess(&img);
        assert!((0.0..=1.0).contains(&quality.blur_score));
        assert!((0.0..=1.0).contains(&quality.contrast_score));
        assert!((0.0..=1.0).contains(&quality.brightness_score));
        assert!((0.0..=1.0).contains(&quality.noise_level));
    }
}
