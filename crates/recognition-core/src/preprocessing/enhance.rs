//! Denoising, sharpening, contrast enhancement and CLAHE.
//!
//! `imageproc` has no bilateral filter or CLAHE; both are hand-rolled here
//! following the formulas this pipeline is built against.

use image::{DynamicImage, GenericImageView, GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;

use crate::types::ImageQuality;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenoiseStrength {
    Light,
    Normal,
    Heavy,
}

impl DenoiseStrength {
    /// `(d, sigma_color, sigma_space)` triple for this strength.
    fn params(self) -> (i32, f32, f32) {
        match self {
            DenoiseStrength::Light => (9, 12.0, 12.0),
            DenoiseStrength::Normal => (11, 17.0, 17.0),
            DenoiseStrength::Heavy => (15, 25.0, 25.0),
        }
    }
}

/// Bilateral filter: a spatial Gaussian weighted by a range Gaussian over
/// intensity difference, preserving edges while smoothing flat regions.
pub fn denoise(image: &DynamicImage, strength: DenoiseStrength) -> DynamicImage {
    let (d, sigma_color, sigma_space) = strength.params();
    let radius = d / 2;
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    let mut out = GrayImage::new(w, h);

    let two_sigma_space_sq = 2.0 * sigma_space * sigma_space;
    let two_sigma_color_sq = 2.0 * sigma_color * sigma_color;

    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let center = gray.get_pixel(x as u32, y as u32)[0] as f32;
            let mut weight_sum = 0.0f32;
            let mut value_sum = 0.0f32;

            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                        continue;
                    }
                    let neighbor = gray.get_pixel(nx as u32, ny as u32)[0] as f32;
                    let spatial_sq = (dx * dx + dy * dy) as f32;
                    let range_sq = (neighbor - center).powi(2);
                    let weight =
                        (-spatial_sq / two_sigma_space_sq - range_sq / two_sigma_color_sq).exp();
                    weight_sum += weight;
                    value_sum += weight * neighbor;
                }
            }

            let value = if weight_sum > 0.0 { value_sum / weight_sum } else { center };
            out.put_pixel(x as u32, y as u32, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }

    DynamicImage::ImageLuma8(out)
}

/// Unsharp mask: `out = strength*src + (1-strength)*gaussian(src, sigma)`.
pub fn sharpen(image: &DynamicImage, sigma: f32, strength: f32) -> DynamicImage {
    let gray = image.to_luma8();
    let blurred = gaussian_blur_f32(&gray, sigma);
    let (w, h) = gray.dimensions();
    let mut out = GrayImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let src = gray.get_pixel(x, y)[0] as f32;
            let blur = blurred.get_pixel(x, y)[0] as f32;
            let value = strength * src - (strength - 1.0) * blur;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }

    DynamicImage::ImageLuma8(out)
}

/// Contrast-Limited Adaptive Histogram Equalization over 8x8 tiles, with
/// bilinear blending between neighbouring tile mappings at each pixel.
pub fn clahe(image: &DynamicImage, clip_limit: f32) -> DynamicImage {
    const GRID: u32 = 8;
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    if w < GRID || h < GRID {
        return DynamicImage::ImageLuma8(gray);
    }

    let tile_w = (w as f32 / GRID as f32).ceil() as u32;
    let tile_h = (h as f32 / GRID as f32).ceil() as u32;

    let mut mappings: Vec<[u8; 256]> = Vec::with_capacity((GRID * GRID) as usize);
    for ty in 0..GRID {
        for tx in 0..GRID {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            mappings.push(clipped_equalization_map(&gray, x0, y0, x1, y1, clip_limit));
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let value = gray.get_pixel(x, y)[0];
            let fx = (x as f32 / tile_w as f32 - 0.5).max(0.0);
            let fy = (y as f32 / tile_h as f32 - 0.5).max(0.0);
            let tx0 = (fx.floor() as u32).min(GRID - 1);
            let ty0 = (fy.floor() as u32).min(GRID - 1);
            let tx1 = (tx0 + 1).min(GRID - 1);
            let ty1 = (ty0 + 1).min(GRID - 1);
            let wx = (fx - fx.floor()).clamp(0.0, 1.0);
            let wy = (fy - fy.floor()).clamp(0.0, 1.0);

            let m00 = mappings[(ty0 * GRID + tx0) as usize][value as usize] as f32;
            let m10 = mappings[(ty0 * GRID + tx1) as usize][value as usize] as f32;
            let m01 = mappings[(ty1 * GRID + tx0) as usize][value as usize] as f32;
            let m11 = mappings[(ty1 * GRID + tx1) as usize][value as usize] as f32;

            let top = m00 * (1.0 - wx) + m10 * wx;
            let bottom = m01 * (1.0 - wx) + m11 * wx;
            let blended = top * (1.0 - wy) + bottom * wy;

            out.put_pixel(x, y, Luma([blended.round().clamp(0.0, 255.0) as u8]));
        }
    }

    DynamicImage::ImageLuma8(out)
}

/// Clipped histogram equalization map for one tile, redistributing clipped
/// mass uniformly before building the cumulative-distribution lookup table.
fn clipped_equalization_map(
    gray: &GrayImage,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    clip_limit: f32,
) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[gray.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let pixel_count = ((x1 - x0) * (y1 - y0)).max(1) as f32;
    let clip = (clip_limit * pixel_count / 256.0).max(1.0) as u32;

    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let redistribute = excess / 256;
    for bin in histogram.iter_mut() {
        *bin += redistribute;
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (bin, count) in histogram.iter().enumerate() {
        running += count;
        cdf[bin] = running;
    }

    let total = cdf[255].max(1) as f32;
    let mut map = [0u8; 256];
    for (bin, value) in map.iter_mut().enumerate() {
        *value = ((cdf[bin] as f32 / total) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    map
}

/// CLAHE clip limit, denoise strength, and brightness correction chosen from
/// measured quality scalars.
pub fn enhance_adaptive(image: &DynamicImage, quality: &ImageQuality) -> DynamicImage {
    let clip_limit = if quality.contrast_score < 0.3 {
        4.0
    } else if quality.contrast_score < 0.6 {
        2.5
    } else {
        1.5
    };

    let mut result = clahe(image, clip_limit);

    if quality.noise_level > 0.3 {
        let strength = if quality.noise_level > 0.6 {
            DenoiseStrength::Heavy
        } else {
            DenoiseStrength::Normal
        };
        result = denoise(&result, strength);
    }

    if quality.brightness_score < 0.3 || quality.brightness_score > 0.7 {
        result = correct_brightness(&result, quality.brightness_score);
    }

    result
}

/// Scales pixel values so mean luminance approaches `0.5*255`, clamping the
/// multiplicative factor to `[0.5, 2.0]`.
fn correct_brightness(image: &DynamicImage, brightness_score: f32) -> DynamicImage {
    let current_mean = (brightness_score * 255.0).max(1.0);
    let factor = (127.5 / current_mean).clamp(0.5, 2.0);

    match image {
        DynamicImage::ImageLuma8(gray) => {
            let mut out = gray.clone();
            for pixel in out.pixels_mut() {
                pixel[0] = (pixel[0] as f32 * factor).round().clamp(0.0, 255.0) as u8;
            }
            DynamicImage::ImageLuma8(out)
        }
        other => {
            let rgb = other.to_rgb8();
            let (w, h) = rgb.dimensions();
            let mut out = RgbImage::new(w, h);
            for (x, y, pixel) in rgb.enumerate_pixels() {
                let scaled = [
                    (pixel[0] as f32 * factor).round().clamp(0.0, 255.0) as u8,
                    (pixel[1] as f32 * factor).round().clamp(0.0, 255.0) as u8,
                    (pixel[2] as f32 * factor).round().clamp(0.0, 255.0) as u8,
                ];
                out.put_pixel(x, y, Rgb(scaled));
            }
            DynamicImage::ImageRgb8(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn clahe_preserves_image_dimensions() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([100])));
        let result = clahe(&img, 2.0);
        assert_eq!(result.dimensions(), (64, 64));
    }

    #[test]
    fn brightness_correction_moves_dark_image_toward_midtone() {
        let dark = DynamicImage::ImageLuma8(GrayImage::from_pixel(32, 32, Luma([20])));
        let corrected = correct_brightness(&dark, 20.0 / 255.0);
        let mean: u32 = corrected.to_luma8().pixels().map(|p| p[0] as u32).sum();
        let mean = mean / (32 * 32);
        assert!(mean > 20);
    }

    #[test]
    fn sharpen_keeps_dimensions_and_valid_pixel_range() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 40, Luma([128])));
        let sharpened = sharpen(&img, 3.0, 1.5);
        assert_eq!(sharpened.dimensions(), (40, 40));
    }

    #[test]
    fn denoise_smooths_salt_and_pepper_outlier() {
        let mut gray = GrayImage::from_pixel(20, 20, Luma([128]));
        gray.put_pixel(10, 10, Luma([255]));
        let denoised = denoise(&DynamicImage::ImageLuma8(gray), DenoiseStrength::Normal);
        let center = denoised.to_luma8().get_pixel(10, 10)[0];
        assert!(center < 255, "outlier pixel should be smoothed toward neighbours");
    }
}
