//! Shared data model for the recognition core.

use std::collections::HashMap;

use plate_detector::BoundingBox;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImageQuality {
    pub blur_score: f32,
    pub contrast_score: f32,
    pub brightness_score: f32,
    pub noise_level: f32,
    pub is_skewed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionInfo {
    pub position: usize,
    pub original: char,
    pub corrected: char,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub text: String,
    pub original_text: String,
    pub confidence: f32,
    pub region: Option<String>,
    pub format_name: Option<String>,
    pub corrections: Vec<CorrectionInfo>,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub use_plate_detection: bool,
    pub plate_detection_model: String,
    pub detection_confidence: f32,
    pub detection_padding: u32,
    pub ocr_languages: Vec<String>,
    pub ocr_gpu: bool,
    pub min_ocr_confidence: f32,
    pub default_region: String,
    pub needs_review_threshold: f32,
    pub auto_accept_threshold: f32,
    pub enable_enhanced_retry: bool,
    pub max_processing_attempts: u32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            use_plate_detection: true,
            plate_detection_model: "models/plate_detector.onnx".to_string(),
            detection_confidence: 0.5,
            detection_padding: 10,
            ocr_languages: vec!["eng".to_string()],
            ocr_gpu: false,
            min_ocr_confidence: 0.3,
            default_region: "BR".to_string(),
            needs_review_threshold: 0.7,
            auto_accept_threshold: 0.9,
            enable_enhanced_retry: true,
            max_processing_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognitionMetadata {
    pub attempts: u32,
    pub stages_applied: Vec<String>,
    pub quality_snapshot: ImageQuality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub plate_number: Option<String>,
    pub confidence_score: f32,
    pub detection_confidence: f32,
    pub ocr_confidence: f32,
    pub bounding_box: Option<BoundingBox>,
    pub plate_region: Option<String>,
    pub needs_review: bool,
    pub metadata: RecognitionMetadata,
}

/// A single position's expected character class in a plate format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharClass {
    Letter,
    Digit,
}

pub type CorrectionTable = HashMap<char, char>;
