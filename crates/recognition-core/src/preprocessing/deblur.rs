//! Motion deblur via Wiener deconvolution.
//!
//! Not called by the default orchestrator (the reference pipeline never
//! invokes it either), but exposed for callers assembling a custom
//! preprocessing pipeline.

use std::f32::consts::PI;

use image::{DynamicImage, GrayImage, Luma};
use num_complex::Complex32;
use rustfft::FftPlanner;

const NOISE_VARIANCE: f32 = 0.01;

/// Builds a horizontal motion-blur kernel of `length` rotated by `angle_degrees`,
/// rasterized into a `(length, length)` grid.
fn motion_kernel(length: usize, angle_degrees: f32) -> Vec<f32> {
    let size = length.max(1);
    let mut kernel = vec![0.0f32; size * size];
    let center = (size as f32 - 1.0) / 2.0;
    let angle = angle_degrees.to_radians();
    let (dx, dy) = (angle.cos(), angle.sin());

    let steps = size * 4;
    let mut weight_sum = 0.0f32;
    for step in 0..steps {
        let t = (step as f32 / (steps - 1).max(1) as f32 - 0.5) * (size as f32 - 1.0);
        let x = (center + t * dx).round();
        let y = (center + t * dy).round();
        if x >= 0.0 && y >= 0.0 && (x as usize) < size && (y as usize) < size {
            kernel[y as usize * size + x as usize] += 1.0;
            weight_sum += 1.0;
        }
    }
    if weight_sum > 0.0 {
        for v in kernel.iter_mut() {
            *v /= weight_sum;
        }
    }
    kernel
}

/// Pads `data` (row-major, `src_w x src_h`) into a `(dst_w, dst_h)` buffer,
/// centring the kernel at the origin (wrap layout expected by FFT-domain
/// convolution).
fn embed_kernel(kernel: &[f32], k_size: usize, dst_w: usize, dst_h: usize) -> Vec<Complex32> {
    let mut out = vec![Complex32::new(0.0, 0.0); dst_w * dst_h];
    let half = k_size / 2;
    for ky in 0..k_size {
        for kx in 0..k_size {
            let value = kernel[ky * k_size + kx];
            if value == 0.0 {
                continue;
            }
            let ox = (kx as isize - half as isize).rem_euclid(dst_w as isize) as usize;
            let oy = (ky as isize - half as isize).rem_euclid(dst_h as isize) as usize;
            out[oy * dst_w + ox] = Complex32::new(value, 0.0);
        }
    }
    out
}

fn fft2d(data: &mut [Complex32], w: usize, h: usize, inverse: bool) {
    let mut planner = FftPlanner::new();
    let fft_row = if inverse { planner.plan_fft_inverse(w) } else { planner.plan_fft_forward(w) };
    for row in data.chunks_mut(w) {
        fft_row.process(row);
    }

    let mut column = vec![Complex32::new(0.0, 0.0); h];
    let fft_col = if inverse { planner.plan_fft_inverse(h) } else { planner.plan_fft_forward(h) };
    for x in 0..w {
        for y in 0..h {
            column[y] = data[y * w + x];
        }
        fft_col.process(&mut column);
        for y in 0..h {
            data[y * w + x] = column[y];
        }
    }
}

/// Wiener deconvolution: `H* / (|H|^2 + noise_var)` applied in the
/// frequency domain, then inverse-FFT and magnitude-clamped back to pixels.
pub fn motion_deblur(image: &DynamicImage, kernel_length: usize, angle_degrees: f32) -> DynamicImage {
    let gray = image.to_luma8();
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    if w == 0 || h == 0 {
        return DynamicImage::ImageLuma8(gray);
    }

    let mut image_freq: Vec<Complex32> =
        gray.pixels().map(|p| Complex32::new(p[0] as f32 / 255.0, 0.0)).collect();
    fft2d(&mut image_freq, w, h, false);

    let kernel = motion_kernel(kernel_length, angle_degrees);
    let mut kernel_freq = embed_kernel(&kernel, kernel_length.max(1), w, h);
    fft2d(&mut kernel_freq, w, h, false);

    let mut result_freq = vec![Complex32::new(0.0, 0.0); w * h];
    for i in 0..w * h {
        let hf = kernel_freq[i];
        let mag_sq = hf.norm_sqr();
        let wiener = hf.conj() / (mag_sq + NOISE_VARIANCE);
        result_freq[i] = image_freq[i] * wiener;
    }

    fft2d(&mut result_freq, w, h, true);
    let scale = 1.0 / (w * h) as f32;

    let mut out = GrayImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let value = (result_freq[y * w + x].re * scale * 255.0).abs().clamp(0.0, 255.0);
            out.put_pixel(x as u32, y as u32, Luma([value as u8]));
        }
    }

    DynamicImage::ImageLuma8(out)
}

/// Kept for reference alongside `motion_kernel`: the angle normalized to
/// `[0, 2*PI)`, used when a caller supplies degrees outside that span.
pub fn normalize_angle(angle_degrees: f32) -> f32 {
    let radians = angle_degrees.to_radians().rem_euclid(2.0 * PI);
    radians.to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma as LumaPixel;

    #[test]
    fn motion_deblur_preserves_image_dimensions() {
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(32, 32, LumaPixel([128])));
        let result = motion_deblur(&img, 15, 0.0);
        assert_eq!(result.dimensions(), (32, 32));
    }

    #[test]
    fn motion_kernel_weights_sum_to_one() {
        let kernel = motion_kernel(15, 0.0);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-3);
    }

    #[test]
    fn normalize_angle_wraps_into_unit_circle() {
        assert!((normalize_angle(370.0) - 10.0).abs() < 1e-3);
    }
}
