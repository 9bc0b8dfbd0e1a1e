//! Drives one image through quality assessment, detection, OCR, candidate
//! fusion and validation into a single [`RecognitionResult`], retrying a
//! fixed set of preprocessing configurations when confidence is weak.

use image::{DynamicImage, GenericImageView};
use plate_detector::{BoundingBox, DetectorError, FallbackDetector, PlateDetector};
use plate_ocr::OcrEngine;
use tracing::{debug, info, warn};

use crate::candidates::assemble_candidates;
use crate::preprocessing::{retry_configs, PreprocessingPipeline};
use crate::quality::QualityAssessor;
use crate::types::{RecognitionConfig, RecognitionMetadata, RecognitionResult, ValidationResult};
use crate::validation::{PlateValidator, FORMAT_REGISTRY};

/// Upper bound on the short side of an already plate-like crop; see the
/// detect-or-skip heuristic in step 2.
const FAST_PATH_MAX_WIDTH: u32 = 800;
const FAST_PATH_MAX_HEIGHT: u32 = 300;
const FAST_PATH_MIN_ASPECT: f32 = 1.5;
const FAST_PATH_MAX_ASPECT: f32 = 7.0;
const FAST_PATH_DETECTION_CONFIDENCE: f32 = 0.8;
const MISS_DETECTION_CONFIDENCE: f32 = 0.5;

struct Attempt {
    overall: f32,
    ocr_confidence: f32,
    validation: ValidationResult,
}

pub struct RecognitionOrchestrator {
    detector: Box<dyn PlateDetector>,
    ocr_engine: Box<dyn OcrEngine>,
    config: RecognitionConfig,
    quality_assessor: QualityAssessor,
    pipeline: PreprocessingPipeline,
}

impl RecognitionOrchestrator {
    pub fn new(
        detector: Box<dyn PlateDetector>,
        ocr_engine: Box<dyn OcrEngine>,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            detector,
            ocr_engine,
            config,
            quality_assessor: QualityAssessor::new(),
            pipeline: PreprocessingPipeline::default(),
        }
    }

    pub fn process_image(&self, path: &std::path::Path) -> anyhow::Result<RecognitionResult> {
        let image = image::open(path)?;
        Ok(self.process_image_array(&image))
    }

    pub fn process_image_array(&self, image: &DynamicImage) -> RecognitionResult {
        let mut stages_applied = Vec::new();
        let quality_snapshot = self.quality_assessor.assess(image);

        let (crop, bounding_box, detection_confidence) =
            self.detect_or_skip(image, &mut stages_applied);

        let mut attempts = 0u32;
        let ocr_result = self.ocr_engine.extract_text(&crop).unwrap_or_default();
        attempts += 1;

        let candidates = assemble_candidates(&ocr_result, self.config.min_ocr_confidence);
        let validator = PlateValidator::new(&FORMAT_REGISTRY);
        let validation = best_validation(&validator, &candidates, &self.config.default_region);

        let mut best = Attempt {
            overall: overall_confidence(detection_confidence, ocr_result.confidence, validation.confidence),
            ocr_confidence: ocr_result.confidence,
            validation,
        };

        if self.config.enable_enhanced_retry
            && best.overall < self.config.needs_review_threshold
            && attempts < self.config.max_processing_attempts
        {
            for preprocess_config in retry_configs() {
                if attempts >= self.config.max_processing_attempts {
                    break;
                }

                let processed = self.pipeline.process_with_config(&crop, &preprocess_config);
                let ocr_result = match self.ocr_engine.extract_text(&processed) {
                    Ok(result) => result,
                    Err(error) => {
                        warn!(%error, "OCR retry attempt failed, skipping");
                        attempts += 1;
                        continue;
                    }
                };
                attempts += 1;

                let candidates = assemble_candidates(&ocr_result, self.config.min_ocr_confidence);
                let validation = best_validation(&validator, &candidates, &self.config.default_region);
                let overall =
                    overall_confidence(detection_confidence, ocr_result.confidence, validation.confidence);

                debug!(overall, attempts, "retry attempt scored");

                if overall > best.overall {
                    best = Attempt { overall, ocr_confidence: ocr_result.confidence, validation };
                }

                if best.overall >= self.config.auto_accept_threshold {
                    stages_applied.push(format!("preprocessing_{:?}", preprocess_config));
                    break;
                }
            }
        }

        let needs_review = best.overall < self.config.needs_review_threshold;
        let plate_number = if best.validation.is_valid || best.validation.confidence > 0.3 {
            Some(best.validation.text.clone())
        } else {
            None
        };

        info!(
            plate_number = ?plate_number,
            confidence = best.overall,
            needs_review,
            attempts,
            "recognition complete"
        );

        RecognitionResult {
            plate_number,
            confidence_score: best.overall,
            detection_confidence,
            ocr_confidence: best.ocr_confidence,
            bounding_box,
            plate_region: best.validation.region.clone(),
            needs_review,
            metadata: RecognitionMetadata { attempts, stages_applied, quality_snapshot },
        }
    }

    /// If the frame is already plate-like, skip detection entirely.
    /// Otherwise run the detector once; a miss falls back to the whole
    /// image at a lower detection confidence.
    fn detect_or_skip(
        &self,
        image: &DynamicImage,
        stages_applied: &mut Vec<String>,
    ) -> (DynamicImage, Option<BoundingBox>, f32) {
        let (w, h) = image.dimensions();
        let aspect = w as f32 / h.max(1) as f32;

        if w < FAST_PATH_MAX_WIDTH
            && h < FAST_PATH_MAX_HEIGHT
            && (FAST_PATH_MIN_ASPECT..=FAST_PATH_MAX_ASPECT).contains(&aspect)
        {
            stages_applied.push("pre_cropped_plate".to_string());
            return (image.clone(), None, FAST_PATH_DETECTION_CONFIDENCE);
        }

        if !self.config.use_plate_detection {
            stages_applied.push("fallback_full_image".to_string());
            return (image.clone(), None, MISS_DETECTION_CONFIDENCE);
        }

        match self.detector.detect(image) {
            Ok(Some(detection)) => {
                stages_applied.push("detection".to_string());
                let crop = self.detector.crop_plate(image, &detection, self.config.detection_padding);
                (crop, Some(detection.bounding_box), detection.confidence)
            }
            Ok(None) => {
                stages_applied.push("fallback_full_image".to_string());
                (image.clone(), None, MISS_DETECTION_CONFIDENCE)
            }
            Err(DetectorError::ModelLoadError(reason)) => {
                warn!(reason, "detection model failed to load, falling back to centred-crop detector");
                stages_applied.push("fallback_full_image".to_string());
                centred_crop_fallback(image)
            }
            Err(error) => {
                warn!(%error, "detector inference failed, falling back to full image");
                stages_applied.push("fallback_full_image".to_string());
                (image.clone(), None, MISS_DETECTION_CONFIDENCE)
            }
        }
    }
}

/// Centred-crop region used when the detection model itself couldn't load
/// (as opposed to a per-image inference miss, which skips straight to the
/// whole image).
fn centred_crop_fallback(image: &DynamicImage) -> (DynamicImage, Option<BoundingBox>, f32) {
    let fallback = FallbackDetector::default();
    match fallback.detect(image) {
        Ok(Some(detection)) => {
            let crop = fallback.crop_plate(image, &detection, 0);
            (crop, Some(detection.bounding_box), detection.confidence)
        }
        _ => (image.clone(), None, MISS_DETECTION_CONFIDENCE),
    }
}

fn overall_confidence(detection_confidence: f32, ocr_confidence: f32, validation_confidence: f32) -> f32 {
    0.3 * detection_confidence + 0.4 * ocr_confidence + 0.3 * validation_confidence
}

fn best_validation(
    validator: &PlateValidator,
    candidates: &[(String, f32)],
    default_region: &str,
) -> ValidationResult {
    let validated = validator.validate_batch(candidates, Some(default_region));
    if let Some(top) = validated.into_iter().next() {
        return top;
    }

    match candidates.iter().max_by(|a, b| a.1.partial_cmp(&b.1).unwrap()) {
        Some((text, confidence)) => ValidationResult {
            text: text.clone(),
            original_text: text.clone(),
            confidence: 0.3 * confidence,
            region: None,
            format_name: None,
            corrections: Vec::new(),
            is_valid: false,
        },
        None => ValidationResult {
            text: String::new(),
            original_text: String::new(),
            confidence: 0.0,
            region: None,
            format_name: None,
            corrections: Vec::new(),
            is_valid: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plate_detector::{DetectionResult, DetectorError};
    use plate_ocr::{CharacterResult, OcrError, OcrResult, Segment, SegmentBox};

    struct StubDetector {
        hit: Option<DetectionResult>,
    }
    impl PlateDetector for StubDetector {
        fn detect_all(&self, _image: &DynamicImage) -> Result<Vec<DetectionResult>, DetectorError> {
            Ok(self.hit.clone().into_iter().collect())
        }
    }

    struct StubErrorDetector {
        error: fn() -> DetectorError,
    }
    impl PlateDetector for StubErrorDetector {
        fn detect_all(&self, _image: &DynamicImage) -> Result<Vec<DetectionResult>, DetectorError> {
            Err((self.error)())
        }
    }

    struct StubOcr {
        result: OcrResult,
    }
    impl OcrEngine for StubOcr {
        fn extract_text(&self, _image: &DynamicImage) -> Result<OcrResult, OcrError> {
            Ok(self.result.clone())
        }
    }

    fn exact_plate_ocr_result() -> OcrResult {
        OcrResult {
            text: "ABC1D23".into(),
            confidence: 0.9,
            characters: (0..7)
                .map(|i| CharacterResult { char: 'A', confidence: 0.9, position: i })
                .collect(),
            segments: vec![Segment {
                bbox: SegmentBox { x: 0, y: 0, width: 50, height: 20 },
                text: "ABC1D23".into(),
                confidence: 0.9,
            }],
        }
    }

    #[test]
    fn pre_cropped_fast_path_skips_detection_and_tags_metadata() {
        let orchestrator = RecognitionOrchestrator::new(
            Box::new(StubDetector { hit: None }),
            Box::new(StubOcr { result: exact_plate_ocr_result() }),
            RecognitionConfig { enable_enhanced_retry: false, ..Default::default() },
        );
        let image = DynamicImage::new_rgb8(200, 60);
        let result = orchestrator.process_image_array(&image);

        assert_eq!(result.detection_confidence, FAST_PATH_DETECTION_CONFIDENCE);
        assert!(result.bounding_box.is_none());
        assert!(result.metadata.stages_applied.contains(&"pre_cropped_plate".to_string()));
    }

    #[test]
    fn exact_match_yields_high_confidence_and_no_review_flag() {
        let orchestrator = RecognitionOrchestrator::new(
            Box::new(StubDetector { hit: None }),
            Box::new(StubOcr { result: exact_plate_ocr_result() }),
            RecognitionConfig { enable_enhanced_retry: false, ..Default::default() },
        );
        let image = DynamicImage::new_rgb8(200, 60);
        let result = orchestrator.process_image_array(&image);

        assert_eq!(result.plate_number.as_deref(), Some("ABC1D23"));
        assert!(!result.needs_review);
        assert!((0.0..=1.0).contains(&result.confidence_score));
        assert_eq!(result.metadata.attempts, 1);
    }

    #[test]
    fn miss_without_detection_model_falls_back_to_whole_image() {
        let orchestrator = RecognitionOrchestrator::new(
            Box::new(StubDetector { hit: None }),
            Box::new(StubOcr { result: OcrResult::default() }),
            RecognitionConfig { enable_enhanced_retry: false, ..Default::default() },
        );
        // Large, non-plate-shaped image so the fast path does not apply.
        let image = DynamicImage::new_rgb8(1200, 900);
        let result = orchestrator.process_image_array(&image);

        assert_eq!(result.detection_confidence, MISS_DETECTION_CONFIDENCE);
        assert!(result.bounding_box.is_none());
        assert!(result.plate_number.is_none());
        assert!(result.needs_review);
    }

    #[test]
    fn model_load_failure_falls_back_to_centred_crop_not_whole_image() {
        let orchestrator = RecognitionOrchestrator::new(
            Box::new(StubErrorDetector { error: || DetectorError::ModelLoadError("missing model file".into()) }),
            Box::new(StubOcr { result: OcrResult::default() }),
            RecognitionConfig { enable_enhanced_retry: false, ..Default::default() },
        );
        let image = DynamicImage::new_rgb8(1200, 900);
        let result = orchestrator.process_image_array(&image);

        assert_eq!(result.detection_confidence, 0.5);
        assert!(result.bounding_box.is_some());
        let bbox = result.bounding_box.unwrap();
        assert!(bbox.width < 1200 && bbox.height < 900);
        assert!(result.metadata.stages_applied.contains(&"fallback_full_image".to_string()));
    }

    #[test]
    fn per_image_inference_failure_falls_back_to_whole_image() {
        let orchestrator = RecognitionOrchestrator::new(
            Box::new(StubErrorDetector { error: || DetectorError::InferenceError("bad tensor".into()) }),
            Box::new(StubOcr { result: OcrResult::default() }),
            RecognitionConfig { enable_enhanced_retry: false, ..Default::default() },
        );
        let image = DynamicImage::new_rgb8(1200, 900);
        let result = orchestrator.process_image_array(&image);

        assert_eq!(result.detection_confidence, MISS_DETECTION_CONFIDENCE);
        assert!(result.bounding_box.is_none());
    }

    #[test]
    fn attempts_never_exceed_configured_maximum() {
        let orchestrator = RecognitionOrchestrator::new(
            Box::new(StubDetector { hit: None }),
            Box::new(StubOcr { result: OcrResult::default() }),
            RecognitionConfig { max_processing_attempts: 2, ..Default::default() },
        );
        let image = DynamicImage::new_rgb8(1200, 900);
        let result = orchestrator.process_image_array(&image);
        assert!(result.metadata.attempts >= 1);
        assert!(result.metadata.attempts <= 2);
    }
}
