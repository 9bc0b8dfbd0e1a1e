//! OCR engine adapter.
//!
//! Wraps a Tesseract engine behind the [`OcrEngine`] trait so the
//! recognition orchestrator never depends on a concrete OCR backend.
//! Engine-init failure is fatal (propagated to the caller); per-image
//! inference failure returns an empty [`OcrResult`] rather than an error,
//! since a failed OCR pass is a normal outcome the orchestrator retries.

use std::sync::Mutex;

use image::{DynamicImage, GenericImageView};
use leptess::LepTess;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to initialize OCR engine: {0}")]
    EngineInitError(String),
}

/// Axis-aligned pixel-space box for a word-level segment. Kept local to
/// this crate (rather than reusing plate-detector's `BoundingBox`) so the
/// OCR adapter has no dependency on the detector.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SegmentBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Segment {
    pub bbox: SegmentBox,
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CharacterResult {
    pub char: char,
    pub confidence: f32,
    pub position: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct OcrResult {
    /// Concatenation of accepted segments' text, in engine order.
    pub text: String,
    /// Mean confidence of accepted segments, 0 if none.
    pub confidence: f32,
    pub characters: Vec<CharacterResult>,
    /// Every raw word-level detection in reading order, accepted or not.
    pub segments: Vec<Segment>,
}

pub trait OcrEngine: Send + Sync {
    fn extract_text(&self, image: &DynamicImage) -> Result<OcrResult, OcrError>;

    /// `(text, confidence)` for every raw segment at or above `min_confidence`,
    /// sorted by confidence descending.
    fn get_candidates(&self, result: &OcrResult, min_confidence: f32) -> Vec<(String, f32)> {
        let mut candidates: Vec<(String, f32)> = result
            .segments
            .iter()
            .filter(|s| s.confidence >= min_confidence)
            .map(|s| (s.text.clone(), s.confidence))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        candidates
    }

    /// Character positions whose confidence falls below `threshold`.
    fn get_low_confidence_positions(&self, result: &OcrResult, threshold: f32) -> Vec<usize> {
        result
            .characters
            .iter()
            .filter(|c| c.confidence < threshold)
            .map(|c| c.position)
            .collect()
    }
}

pub struct TesseractOcrEngine {
    languages: String,
    min_confidence: f32,
    engine: OnceCell<Mutex<LepTess>>,
}

impl TesseractOcrEngine {
    pub fn new(languages: &[String], min_confidence: f32) -> Self {
        let languages = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };
        Self {
            languages,
            min_confidence,
            engine: OnceCell::new(),
        }
    }

    fn engine(&self) -> Result<&Mutex<LepTess>, OcrError> {
        self.engine.get_or_try_init(|| {
            let mut tess = LepTess::new(None, &self.languages)
                .map_err(|e| OcrError::EngineInitError(e.to_string()))?;
            tess.set_variable(
                leptess::Variable::TesseditCharWhitelist,
                "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-",
            )
            .map_err(|e| OcrError::EngineInitError(e.to_string()))?;
            Ok(Mutex::new(tess))
        })
    }

    /// Grayscale, normalize dimensions, and boost contrast for small
    /// alphanumeric plate crops.
    fn preprocess(image: &DynamicImage) -> DynamicImage {
        let mut processed = DynamicImage::ImageLuma8(image.to_luma8());

        let (w, h) = processed.dimensions();
        if w < 100 || h < 30 {
            processed = processed.resize(w * 2, h * 2, image::imageops::FilterType::Lanczos3);
        } else if w > 1000 || h > 300 {
            processed = processed.resize(1000, 300, image::imageops::FilterType::Lanczos3);
        }

        let stretched = imageproc::contrast::stretch_contrast(&processed.to_luma8(), 50, 205);
        DynamicImage::ImageLuma8(imageproc::contrast::adaptive_threshold(&stretched, 15))
    }

    /// Parse Tesseract's `--tsv` output into word-level segments
    /// (`level == 5`), in reading order, skipping blank words.
    fn parse_tsv_segments(tsv: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        for line in tsv.lines().skip(1) {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 12 {
                continue;
            }
            let Ok(level) = fields[0].parse::<u32>() else { continue };
            if level != 5 {
                continue;
            }
            let text = fields[11].trim();
            if text.is_empty() {
                continue;
            }
            let (left, top, width, height, conf) = (
                fields[6].parse::<i32>().unwrap_or(0),
                fields[7].parse::<i32>().unwrap_or(0),
                fields[8].parse::<i32>().unwrap_or(0),
                fields[9].parse::<i32>().unwrap_or(0),
                fields[10].parse::<f32>().unwrap_or(-1.0),
            );
            if conf < 0.0 {
                continue;
            }
            segments.push(Segment {
                bbox: SegmentBox { x: left, y: top, width, height },
                text: text.to_string(),
                confidence: conf / 100.0,
            });
        }
        segments
    }
}

impl OcrEngine for TesseractOcrEngine {
    fn extract_text(&self, image: &DynamicImage) -> Result<OcrResult, OcrError> {
        let engine = self.engine()?;
        let mut tess = engine.lock().expect("tesseract engine mutex poisoned");

        let processed = Self::preprocess(image);
        let (w, h) = processed.dimensions();
        let bytes = processed.to_luma8().into_raw();

        if let Err(e) = tess.set_image_from_mem(&bytes, w as i32, h as i32, 1, w as i32) {
            warn!(error = %e, "OCR inference failed, returning empty result");
            return Ok(OcrResult::default());
        }

        let tsv = match tess.get_tsv_text(0) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "OCR inference failed, returning empty result");
                return Ok(OcrResult::default());
            }
        };

        let segments = Self::parse_tsv_segments(&tsv);
        let accepted: Vec<&Segment> = segments
            .iter()
            .filter(|s| s.confidence >= self.min_confidence)
            .collect();

        let mut text = String::new();
        let mut characters = Vec::new();
        let mut confidence_sum = 0.0f32;

        for segment in &accepted {
            let offset = text.chars().count();
            for (i, ch) in segment.text.chars().enumerate() {
                characters.push(CharacterResult {
                    char: ch,
                    confidence: segment.confidence,
                    position: offset + i,
                });
            }
            text.push_str(&segment.text);
            confidence_sum += segment.confidence;
        }

        let confidence = if accepted.is_empty() {
            0.0
        } else {
            confidence_sum / accepted.len() as f32
        };

        debug!(text = %text, confidence, segments = segments.len(), "OCR extraction complete");

        Ok(OcrResult { text, confidence, characters, segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> OcrResult {
        OcrResult {
            text: "ABC1D23".into(),
            confidence: 0.85,
            characters: vec![
                CharacterResult { char: 'A', confidence: 0.9, position: 0 },
                CharacterResult { char: 'B', confidence: 0.4, position: 1 },
            ],
            segments: vec![
                Segment {
                    bbox: SegmentBox { x: 0, y: 0, width: 10, height: 10 },
                    text: "ABC".into(),
                    confidence: 0.8,
                },
                Segment {
                    bbox: SegmentBox { x: 10, y: 0, width: 14, height: 10 },
                    text: "1D23".into(),
                    confidence: 0.85,
                },
                Segment {
                    bbox: SegmentBox { x: 24, y: 0, width: 20, height: 10 },
                    text: "BRASIL".into(),
                    confidence: 0.2,
                },
            ],
        }
    }

    struct DummyEngine;
    impl OcrEngine for DummyEngine {
        fn extract_text(&self, _image: &DynamicImage) -> Result<OcrResult, OcrError> {
            Ok(sample_result())
        }
    }

    #[test]
    fn candidates_are_filtered_and_sorted_by_confidence() {
        let engine = DummyEngine;
        let result = sample_result();
        let candidates = engine.get_candidates(&result, 0.3);
        assert_eq!(
            candidates,
            vec![("1D23".to_string(), 0.85), ("ABC".to_string(), 0.8)]
        );
    }

    #[test]
    fn low_confidence_positions_reports_expected_index() {
        let engine = DummyEngine;
        let result = sample_result();
        assert_eq!(engine.get_low_confidence_positions(&result, 0.5), vec![1]);
    }

    #[test]
    fn tsv_parsing_keeps_only_word_level_rows() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                    1\t1\t0\t0\t0\t0\t0\t0\t100\t40\t-1\t\n\
                    5\t1\t0\t0\t1\t1\t5\t5\t30\t20\t92.5\tABC\n\
                    5\t1\t0\t0\t1\t2\t40\t5\t40\t20\t88.0\t1D23\n";
        let segments = TesseractOcrEngine::parse_tsv_segments(tsv);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "ABC");
        assert!((segments[0].confidence - 0.925).abs() < 1e-6);
        assert_eq!(segments[1].text, "1D23");
    }

    #[test]
    fn engine_construction_defaults_to_english_when_no_languages_given() {
        let engine = TesseractOcrEngine::new(&[], 0.3);
        assert_eq!(engine.languages, "eng");
    }
}
