//! Plate localization.
//!
//! Two detector variants are exposed behind the [`PlateDetector`] trait:
//! [`ModelBackedDetector`], which delegates to an ONNX object-detection model
//! loaded lazily on first use, and [`FallbackDetector`], a centred-crop
//! detector used when the model cannot be loaded. Per-image inference
//! failure is reported as an empty detection list rather than an error, so a
//! single bad frame never takes down a worker.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};
use ndarray::Array;
use ort::{
    Environment, ExecutionProvider, GraphOptimizationLevel, Session, SessionBuilder, Value,
};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load detection model: {0}")]
    ModelLoadError(String),
    #[error("failed to prepare image for inference: {0}")]
    ImageProcessError(String),
    #[error("inference error: {0}")]
    InferenceError(String),
}

/// Pixel-space bounding box. Invariant: `x, y, width, height >= 0` and
/// `x + width <= W`, `y + height <= H` for whatever image it was produced
/// against.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn from_xyxy(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        let x1 = x1.max(0);
        let y1 = y1.max(0);
        let x2 = x2.max(x1);
        let y2 = y2.max(y1);
        Self {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        }
    }

    pub fn to_xyxy(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.x + self.width, self.y + self.height)
    }

    /// Clamp to the given image extents.
    pub fn clamp_to(&self, img_w: u32, img_h: u32) -> Self {
        let x = self.x.min(img_w);
        let y = self.y.min(img_h);
        let width = self.width.min(img_w.saturating_sub(x));
        let height = self.height.min(img_h.saturating_sub(y));
        Self { x, y, width, height }
    }

    /// Expand by `padding` pixels on each side, clamped to `(img_w, img_h)`.
    pub fn add_padding(&self, padding: u32, img_w: u32, img_h: u32) -> Self {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let x2 = (self.x + self.width + padding).min(img_w);
        let y2 = (self.y + self.height + padding).min(img_h);
        BoundingBox {
            x,
            y,
            width: x2.saturating_sub(x),
            height: y2.saturating_sub(y),
        }
        .clamp_to(img_w, img_h)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DetectionResult {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub class_name: String,
}

/// Class names that stand in directly for a license plate, independent of
/// case and hyphen/underscore/space variation.
const PLATE_CLASS_NAMES_RAW: &[&str] = &[
    "license_plate",
    "license plate",
    "plate",
    "number_plate",
    "number plate",
    "car_plate",
    "vehicle_plate",
];

/// Coarse vehicle classes accepted only when no plate-specific class fired.
const VEHICLE_CLASS_NAMES: &[&str] = &["car", "truck", "bus", "vehicle"];

fn normalize_class_name(name: &str) -> String {
    name.to_lowercase().replace(['-', ' '], "_")
}

fn is_plate_class(name: &str) -> bool {
    let normalized = normalize_class_name(name);
    PLATE_CLASS_NAMES_RAW
        .iter()
        .any(|&candidate| normalize_class_name(candidate) == normalized)
        || normalized.contains("plate")
}

fn is_vehicle_class(name: &str) -> bool {
    VEHICLE_CLASS_NAMES.contains(&normalize_class_name(name).as_str())
}

pub trait PlateDetector: Send + Sync {
    /// Highest-confidence accepted detection, if any.
    fn detect(&self, image: &DynamicImage) -> Result<Option<DetectionResult>, DetectorError> {
        Ok(self.detect_all(image)?.into_iter().next())
    }

    /// All accepted detections, sorted by confidence descending.
    fn detect_all(&self, image: &DynamicImage) -> Result<Vec<DetectionResult>, DetectorError>;

    /// Crop `image` to `detection`'s box expanded by `padding` pixels.
    fn crop_plate(
        &self,
        image: &DynamicImage,
        detection: &DetectionResult,
        padding: u32,
    ) -> DynamicImage {
        let (w, h) = image.dimensions();
        let bbox = detection.bounding_box.add_padding(padding, w, h);
        image.crop_imm(bbox.x, bbox.y, bbox.width, bbox.height)
    }
}

const INPUT_WIDTH: u32 = 640;
const INPUT_HEIGHT: u32 = 640;
const IOU_THRESHOLD: f32 = 0.5;

/// Delegates to an ONNX object-detection model loaded lazily on first use,
/// guarded by a one-shot barrier so concurrent first access is safe.
pub struct ModelBackedDetector {
    model_path: PathBuf,
    confidence_threshold: f32,
    session: OnceCell<Session>,
}

impl ModelBackedDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, confidence_threshold: f32) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            confidence_threshold,
            session: OnceCell::new(),
        }
    }

    fn session(&self) -> Result<&Session, DetectorError> {
        self.session.get_or_try_init(|| {
            info!(model_path = %self.model_path.display(), "loading plate detection model");

            let environment = Environment::builder()
                .with_name("plate-detector")
                .with_execution_providers([ExecutionProvider::CUDA(Default::default())])
                .build()
                .map_err(|e| DetectorError::ModelLoadError(e.to_string()))?;

            let session = SessionBuilder::new(&environment)
                .map_err(|e| DetectorError::ModelLoadError(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| DetectorError::ModelLoadError(e.to_string()))?
                .with_model_from_file(&self.model_path)
                .map_err(|e| DetectorError::ModelLoadError(e.to_string()))?;

            info!("plate detection model loaded");
            Ok(session)
        })
    }

    fn preprocess(image: &DynamicImage) -> Result<Array<f32, ndarray::Ix4>, DetectorError> {
        let resized = image
            .resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle)
            .to_rgb8();

        let mut tensor = vec![0.0f32; (INPUT_HEIGHT * INPUT_WIDTH * 3) as usize];
        for (i, pixel) in resized.pixels().enumerate() {
            tensor[i * 3] = pixel[0] as f32 / 255.0;
            tensor[i * 3 + 1] = pixel[1] as f32 / 255.0;
            tensor[i * 3 + 2] = pixel[2] as f32 / 255.0;
        }

        Array::from_shape_vec((1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize), tensor)
            .map_err(|e| DetectorError::ImageProcessError(e.to_string()))
    }

    /// Decode raw model output rows of `(x_center, y_center, w, h, score, class_name)`
    /// into accepted detections, scaled back to `(orig_w, orig_h)`.
    fn postprocess(
        &self,
        rows: &[(f32, f32, f32, f32, f32, String)],
        orig_w: u32,
        orig_h: u32,
    ) -> Vec<DetectionResult> {
        let scale_x = orig_w as f32 / INPUT_WIDTH as f32;
        let scale_y = orig_h as f32 / INPUT_HEIGHT as f32;

        let mut plate_hits = Vec::new();
        let mut vehicle_hits = Vec::new();

        for (xc, yc, w, h, conf, class_name) in rows {
            if *conf < self.confidence_threshold {
                continue;
            }
            let x1 = ((xc - w / 2.0) * scale_x) as i64;
            let y1 = ((yc - h / 2.0) * scale_y) as i64;
            let x2 = ((xc + w / 2.0) * scale_x) as i64;
            let y2 = ((yc + h / 2.0) * scale_y) as i64;
            let bbox = BoundingBox::from_xyxy(x1, y1, x2, y2).clamp_to(orig_w, orig_h);
            let detection = DetectionResult {
                bounding_box: bbox,
                confidence: *conf,
                class_name: class_name.clone(),
            };

            if is_plate_class(class_name) {
                plate_hits.push(detection);
            } else if is_vehicle_class(class_name) {
                vehicle_hits.push(detection);
            }
        }

        // Plate-specific detections always win; vehicle boxes are only a
        // coarse fallback when the frame has no plate-class hit at all.
        let mut accepted = if !plate_hits.is_empty() { plate_hits } else { vehicle_hits };

        accepted.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        non_max_suppression(accepted, IOU_THRESHOLD)
    }
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let (ax1, ay1, ax2, ay2) = a.to_xyxy();
    let (bx1, by1, bx2, by2) = b.to_xyxy();

    let x_left = ax1.max(bx1) as f32;
    let y_top = ay1.max(by1) as f32;
    let x_right = ax2.min(bx2) as f32;
    let y_bottom = ay2.min(by2) as f32;

    if x_right < x_left || y_bottom < y_top {
        return 0.0;
    }

    let intersection = (x_right - x_left) * (y_bottom - y_top);
    let area_a = (a.width * a.height) as f32;
    let area_b = (b.width * b.height) as f32;
    intersection / (area_a + area_b - intersection)
}

fn non_max_suppression(boxes: Vec<DetectionResult>, iou_threshold: f32) -> Vec<DetectionResult> {
    let mut keep = vec![true; boxes.len()];
    for i in 0..boxes.len() {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..boxes.len() {
            if keep[j] && iou(&boxes[i].bounding_box, &boxes[j].bounding_box) > iou_threshold {
                keep[j] = false;
            }
        }
    }
    boxes
        .into_iter()
        .zip(keep)
        .filter_map(|(b, k)| k.then_some(b))
        .collect()
}

impl PlateDetector for ModelBackedDetector {
    fn detect_all(&self, image: &DynamicImage) -> Result<Vec<DetectionResult>, DetectorError> {
        let session = self.session()?;

        let (orig_w, orig_h) = image.dimensions();
        let input = Self::preprocess(image)?;
        let input_value = Value::from_array(session.allocator(), &input)
            .map_err(|e| DetectorError::ImageProcessError(e.to_string()))?;

        let outputs = session
            .run(vec![input_value])
            .map_err(|e| DetectorError::InferenceError(e.to_string()))?;

        let output = outputs
            .first()
            .ok_or_else(|| DetectorError::InferenceError("model returned no outputs".into()))?;
        let array = output
            .try_extract::<f32>()
            .map_err(|e| DetectorError::InferenceError(e.to_string()))?;
        let view = array.view();

        // Expected shape: (1, num_boxes, 5 + num_classes) as
        // [x_center, y_center, w, h, objectness, class_scores...]. We read
        // the most-confident class per row; class names come from the
        // model's registered label set, resolved elsewhere and passed in as
        // `class_N` placeholders here if unavailable.
        let shape = view.shape();
        if shape.len() != 3 {
            warn!(?shape, "unexpected detector output shape, treating as no detections");
            return Ok(Vec::new());
        }

        let mut rows = Vec::with_capacity(shape[1]);
        for i in 0..shape[1] {
            let xc = view[[0, i, 0]];
            let yc = view[[0, i, 1]];
            let w = view[[0, i, 2]];
            let h = view[[0, i, 3]];
            let objectness = view[[0, i, 4]];

            let mut best_class = 0usize;
            let mut best_score = 0.0f32;
            for c in 5..shape[2] {
                let score = view[[0, i, c]];
                if score > best_score {
                    best_score = score;
                    best_class = c - 5;
                }
            }

            rows.push((xc, yc, w, h, objectness * best_score, format!("class_{best_class}")));
        }

        let detections = self.postprocess(&rows, orig_w, orig_h);
        debug!(count = detections.len(), "plate detector accepted detections");
        Ok(detections)
    }
}

/// Returns the full image as a single centred region when no proper
/// detector is available (model failed to load).
pub struct FallbackDetector {
    padding_ratio: f32,
}

impl FallbackDetector {
    pub fn new(padding_ratio: f32) -> Self {
        Self { padding_ratio: padding_ratio.clamp(0.0, 0.5) }
    }
}

impl Default for FallbackDetector {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl PlateDetector for FallbackDetector {
    fn detect_all(&self, image: &DynamicImage) -> Result<Vec<DetectionResult>, DetectorError> {
        let (w, h) = image.dimensions();
        let pad_x = (w as f32 * self.padding_ratio) as u32;
        let pad_y = (h as f32 * self.padding_ratio) as u32;

        Ok(vec![DetectionResult {
            bounding_box: BoundingBox {
                x: pad_x,
                y: pad_y,
                width: w.saturating_sub(2 * pad_x),
                height: h.saturating_sub(2 * pad_y),
            },
            confidence: 0.5,
            class_name: "fallback_region".to_string(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_padding_clamps_to_image() {
        let bbox = BoundingBox { x: 2, y: 2, width: 10, height: 10 };
        let padded = bbox.add_padding(5, 14, 14);
        assert_eq!(padded.x, 0);
        assert_eq!(padded.y, 0);
        assert_eq!(padded.x + padded.width, 14);
        assert_eq!(padded.y + padded.height, 14);
    }

    #[test]
    fn plate_class_matching_is_separator_and_case_insensitive() {
        assert!(is_plate_class("License-Plate"));
        assert!(is_plate_class("number plate"));
        assert!(is_plate_class("car_plate"));
        assert!(is_plate_class("something_plate_ish"));
        assert!(!is_plate_class("car"));
    }

    #[test]
    fn vehicle_class_is_recognized() {
        assert!(is_vehicle_class("Truck"));
        assert!(!is_vehicle_class("bicycle"));
    }

    #[test]
    fn fallback_detector_centers_box_with_padding_ratio() {
        let img = DynamicImage::new_rgb8(100, 40);
        let detector = FallbackDetector::new(0.1);
        let detections = detector.detect_all(&img).unwrap();
        assert_eq!(detections.len(), 1);
        let bbox = detections[0].bounding_box;
        assert_eq!(bbox.x, 10);
        assert_eq!(bbox.y, 4);
        assert_eq!(bbox.width, 80);
        assert_eq!(bbox.height, 32);
        assert_eq!(detections[0].confidence, 0.5);
    }

    #[test]
    fn non_max_suppression_drops_overlapping_lower_confidence_boxes() {
        let boxes = vec![
            DetectionResult {
                bounding_box: BoundingBox { x: 0, y: 0, width: 20, height: 20 },
                confidence: 0.9,
                class_name: "plate".into(),
            },
            DetectionResult {
                bounding_box: BoundingBox { x: 1, y: 1, width: 20, height: 20 },
                confidence: 0.6,
                class_name: "plate".into(),
            },
        ];
        let kept = non_max_suppression(boxes, 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }
}
