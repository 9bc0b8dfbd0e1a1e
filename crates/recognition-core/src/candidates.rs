//! Candidate-string fusion from raw OCR segments.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use plate_ocr::{OcrResult, Segment};
use regex::Regex;

static MERCOSUL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]{3}\d[A-Z]\d{2}").unwrap());
static OLD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]{3}\d{4}").unwrap());

fn push_unique(
    candidates: &mut Vec<(String, f32)>,
    seen: &mut HashSet<String>,
    text: String,
    confidence: f32,
) {
    if text.is_empty() {
        return;
    }
    if seen.insert(text.clone()) {
        candidates.push((text, confidence));
    }
}

fn normalize_for_pattern(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_uppercase()).collect()
}

/// Builds the fused candidate list per the four-step assembly: accepted raw
/// segments (largest-first), the joined aggregate text, adjacent-segment
/// concatenation windows of 2-3, and pattern extraction over every candidate
/// gathered so far. Deduplicated on text, first-seen confidence wins.
pub fn assemble_candidates(ocr: &OcrResult, min_confidence: f32) -> Vec<(String, f32)> {
    let mut candidates: Vec<(String, f32)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut accepted: Vec<&Segment> =
        ocr.segments.iter().filter(|s| s.confidence >= min_confidence).collect();
    accepted.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    for segment in &accepted {
        push_unique(&mut candidates, &mut seen, segment.text.clone(), segment.confidence);
    }

    if ocr.confidence >= min_confidence {
        push_unique(&mut candidates, &mut seen, ocr.text.clone(), ocr.confidence);
    }

    // Adjacent-segment concatenation walks the engine's own emission order
    // (`ocr.segments`), not the confidence-sorted list above.
    let segments = &ocr.segments;
    let n = segments.len();
    for window_len in 2..=3usize {
        if window_len > n {
            continue;
        }
        for start in 0..=(n - window_len) {
            let window = &segments[start..start + window_len];
            if window.iter().all(|s| s.confidence >= min_confidence) {
                let text: String = window.iter().map(|s| s.text.as_str()).collect();
                let confidence = window.iter().map(|s| s.confidence).sum::<f32>() / window_len as f32;
                push_unique(&mut candidates, &mut seen, text, confidence);
            }
        }
    }

    let snapshot = candidates.clone();
    for (text, confidence) in &snapshot {
        let normalized = normalize_for_pattern(text);
        for pattern in [&*MERCOSUL_PATTERN, &*OLD_PATTERN] {
            for found in pattern.find_iter(&normalized) {
                push_unique(
                    &mut candidates,
                    &mut seen,
                    found.as_str().to_string(),
                    0.95 * confidence,
                );
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use plate_ocr::SegmentBox;

    fn segment(text: &str, confidence: f32) -> Segment {
        Segment { bbox: SegmentBox { x: 0, y: 0, width: 10, height: 10 }, text: text.into(), confidence }
    }

    #[test]
    fn fusion_concatenates_adjacent_passing_segments() {
        let ocr = OcrResult {
            text: "ABC1D23".into(),
            confidence: 0.825,
            characters: vec![],
            segments: vec![segment("ABC", 0.8), segment("1D23", 0.85)],
        };
        let candidates = assemble_candidates(&ocr, 0.3);
        assert!(candidates.iter().any(|(t, c)| t == "ABC1D23" && (*c - 0.825).abs() < 1e-4));
    }

    #[test]
    fn pattern_extraction_recovers_plate_from_surrounding_noise() {
        // A single noisy raw segment, not a separately-recognized clean
        // plate segment: "ABC1D23" only ever appears via pattern extraction.
        let ocr = OcrResult {
            text: "BRASIL ABC1D23".into(),
            confidence: 0.7,
            characters: vec![],
            segments: vec![segment("BRASIL ABC1D23", 0.7)],
        };
        let candidates = assemble_candidates(&ocr, 0.3);
        let found = candidates.iter().find(|(t, _)| t == "ABC1D23");
        assert!(found.is_some());
        assert!((found.unwrap().1 - 0.665).abs() < 1e-3);
    }

    #[test]
    fn low_confidence_segments_are_excluded_entirely() {
        let ocr = OcrResult {
            text: "ABC".into(),
            confidence: 0.1,
            characters: vec![],
            segments: vec![segment("ABC", 0.1)],
        };
        let candidates = assemble_candidates(&ocr, 0.3);
        assert!(candidates.is_empty());
    }

    #[test]
    fn duplicate_candidates_keep_first_seen_confidence() {
        let ocr = OcrResult {
            text: "ABC123".into(),
            confidence: 0.5,
            characters: vec![],
            segments: vec![segment("ABC123", 0.9)],
        };
        let candidates = assemble_candidates(&ocr, 0.3);
        let count = candidates.iter().filter(|(t, _)| t == "ABC123").count();
        assert_eq!(count, 1);
        let (_, conf) = candidates.iter().find(|(t, _)| t == "ABC123").unwrap();
        assert_eq!(*conf, 0.9);
    }
}
