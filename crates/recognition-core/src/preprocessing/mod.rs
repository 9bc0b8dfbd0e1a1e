//! Adaptive and parameterized image preprocessing.

pub mod deblur;
pub mod enhance;
pub mod perspective;

use image::{DynamicImage, GenericImageView};
use imageproc::contrast::adaptive_threshold;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};

use crate::types::ImageQuality;
pub use enhance::DenoiseStrength;

const BLUR_THRESHOLD: f32 = 0.5;
const TARGET_LONG_SIDE: u32 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveThresholdConfig {
    pub block_size: u32,
    pub c: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct MorphologyConfig {
    pub dilate_iterations: u32,
    pub erode_iterations: u32,
}

/// Options recognized by [`PreprocessingPipeline::process_with_config`].
/// Transforms are applied in the fixed order: denoise, sharpen, CLAHE,
/// adaptive threshold, morphology.
#[derive(Debug, Clone, Default)]
pub struct PreprocessConfig {
    pub denoise: Option<DenoiseStrength>,
    pub sharpen: bool,
    pub clahe_clip: Option<f32>,
    pub threshold: Option<AdaptiveThresholdConfig>,
    pub morphology: Option<MorphologyConfig>,
}

impl PreprocessConfig {
    pub fn denoise_sharpen_clahe(denoise: DenoiseStrength, clahe_clip: f32) -> Self {
        Self { denoise: Some(denoise), sharpen: true, clahe_clip: Some(clahe_clip), ..Default::default() }
    }

    pub fn adaptive_threshold(block_size: u32, c: i32) -> Self {
        Self { threshold: Some(AdaptiveThresholdConfig { block_size, c }), ..Default::default() }
    }

    pub fn morphology(dilate_iterations: u32, erode_iterations: u32) -> Self {
        Self {
            morphology: Some(MorphologyConfig { dilate_iterations, erode_iterations }),
            ..Default::default()
        }
    }
}

/// The four fixed retry configurations the orchestrator iterates, in order.
pub fn retry_configs() -> Vec<PreprocessConfig> {
    vec![
        PreprocessConfig::denoise_sharpen_clahe(DenoiseStrength::Normal, 2.0),
        PreprocessConfig::denoise_sharpen_clahe(DenoiseStrength::Heavy, 3.0),
        PreprocessConfig::adaptive_threshold(11, 2),
        PreprocessConfig::morphology(1, 1),
    ]
}

pub struct PreprocessingPipeline {
    resize_enabled: bool,
}

impl Default for PreprocessingPipeline {
    fn default() -> Self {
        Self { resize_enabled: true }
    }
}

impl PreprocessingPipeline {
    pub fn new(resize_enabled: bool) -> Self {
        Self { resize_enabled }
    }

    /// Quality-driven pipeline: perspective correction if skewed, sharpening
    /// if blurry, adaptive enhancement if contrast/noise/brightness are out
    /// of band, then an optional final resize. `force_all` runs every stage
    /// unconditionally (used when no quality snapshot is available).
    pub fn process(
        &self,
        image: &DynamicImage,
        quality: Option<&ImageQuality>,
        force_all: bool,
    ) -> DynamicImage {
        let mut result = image.clone();

        if force_all || quality.map(|q| q.is_skewed).unwrap_or(false) {
            result = perspective::correct_perspective(&result);
        }

        if force_all || quality.map(|q| q.blur_score < BLUR_THRESHOLD).unwrap_or(false) {
            result = enhance::sharpen(&result, 3.0, 1.5);
        }

        let needs_enhancement = quality
            .map(|q| q.contrast_score < 0.3 || q.noise_level > 0.3 || !(0.3..=0.7).contains(&q.brightness_score))
            .unwrap_or(false);
        if force_all || needs_enhancement {
            let snapshot = quality.copied().unwrap_or(ImageQuality {
                blur_score: 0.5,
                contrast_score: 0.2,
                brightness_score: 0.5,
                noise_level: 0.5,
                is_skewed: false,
            });
            result = enhance::enhance_adaptive(&result, &snapshot);
        }

        if self.resize_enabled {
            result = resize_to_target(&result);
        }

        result
    }

    /// Applies only the transforms named in `config`, in the fixed order
    /// denoise -> sharpen -> CLAHE -> adaptive threshold -> morphology.
    pub fn process_with_config(&self, image: &DynamicImage, config: &PreprocessConfig) -> DynamicImage {
        let mut result = image.clone();

        if let Some(strength) = config.denoise {
            result = enhance::denoise(&result, strength);
        }
        if config.sharpen {
            result = enhance::sharpen(&result, 3.0, 1.5);
        }
        if let Some(clip) = config.clahe_clip {
            result = enhance::clahe(&result, clip);
        }
        if let Some(threshold_config) = config.threshold {
            result = apply_adaptive_threshold(&result, threshold_config);
        }
        if let Some(morphology_config) = config.morphology {
            result = apply_morphology(&result, morphology_config);
        }

        result
    }
}

/// `imageproc::contrast::adaptive_threshold` takes only a block radius;
/// `c` is folded in as a pre-threshold brightness offset, matching the
/// subtractive-constant role it plays in Gaussian adaptive thresholding.
fn apply_adaptive_threshold(image: &DynamicImage, config: AdaptiveThresholdConfig) -> DynamicImage {
    let radius = (config.block_size / 2).max(1);
    let mut gray = image.to_luma8();
    if config.c != 0 {
        for pixel in gray.pixels_mut() {
            pixel[0] = (pixel[0] as i32 - config.c).clamp(0, 255) as u8;
        }
    }
    DynamicImage::ImageLuma8(adaptive_threshold(&gray, radius))
}

fn apply_morphology(image: &DynamicImage, config: MorphologyConfig) -> DynamicImage {
    let mut gray = image.to_luma8();
    for _ in 0..config.dilate_iterations {
        gray = dilate(&gray, Norm::LInf, 1);
    }
    for _ in 0..config.erode_iterations {
        gray = erode(&gray, Norm::LInf, 1);
    }
    DynamicImage::ImageLuma8(gray)
}

fn resize_to_target(image: &DynamicImage) -> DynamicImage {
    let (w, h) = image.dimensions();
    let long_side = w.max(h);
    if long_side <= TARGET_LONG_SIDE {
        return image.clone();
    }
    let scale = TARGET_LONG_SIDE as f32 / long_side as f32;
    let new_w = (w as f32 * scale).round() as u32;
    let new_h = (h as f32 * scale).round() as u32;
    image.resize(new_w, new_h, image::imageops::FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn process_with_config_applies_only_requested_stages() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([120])));
        let pipeline = PreprocessingPipeline::default();
        let config = PreprocessConfig { sharpen: true, ..Default::default() };
        let result = pipeline.process_with_config(&img, &config);
        assert_eq!(result.dimensions(), (64, 64));
    }

    #[test]
    fn retry_configs_has_exactly_four_entries_in_spec_order() {
        let configs = retry_configs();
        assert_eq!(configs.len(), 4);
        assert!(configs[0].clahe_clip == Some(2.0));
        assert!(configs[1].clahe_clip == Some(3.0));
        assert!(configs[2].threshold.is_some());
        assert!(configs[3].morphology.is_some());
    }

    #[test]
    fn resize_to_target_shrinks_oversized_image_preserving_aspect_ratio() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(2000, 1000, Luma([100])));
        let resized = resize_to_target(&img);
        let (w, h) = resized.dimensions();
        assert_eq!(w, 1000);
        assert_eq!(h, 500);
    }

    #[test]
    fn resize_to_target_leaves_small_image_unchanged() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 60, Luma([100])));
        let resized = resize_to_target(&img);
        assert_eq!(resized.dimensions(), (200, 60));
    }
}
