//! Candidate normalization, blacklist/length screening, registry matching,
//! and confusable-character correction.

pub mod formats;
pub mod rules;

use formats::PlateFormatRegistry;
use once_cell::sync::Lazy;
use rules::PlateRule;

use crate::types::{CharClass, CorrectionInfo, ValidationResult};

const BLACKLIST: &[&str] = &["BRASIL", "BRAZIL", "MERCOSUL", "MERCOSUR", "BR"];
const MIN_LENGTH: usize = 6;
const MAX_LENGTH: usize = 8;
const CORRECTION_PENALTY: f32 = 0.05;

/// Process-wide, effectively-immutable registry constructed once.
pub static FORMAT_REGISTRY: Lazy<PlateFormatRegistry> = Lazy::new(PlateFormatRegistry::with_brazil_defaults);

/// Strips non-alphanumeric characters and upper-cases. Idempotent: applying
/// it to already-normalized text is a no-op.
pub fn normalize(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_uppercase()).collect()
}

pub struct PlateValidator<'a> {
    registry: &'a PlateFormatRegistry,
}

impl<'a> PlateValidator<'a> {
    pub fn new(registry: &'a PlateFormatRegistry) -> Self {
        Self { registry }
    }

    pub fn validate(&self, text: &str, ocr_confidence: f32, region: Option<&str>) -> ValidationResult {
        let original_text = text.to_string();
        let normalized = normalize(text);

        if BLACKLIST.contains(&normalized.as_str()) {
            return ValidationResult {
                text: normalized,
                original_text,
                confidence: 0.0,
                region: None,
                format_name: None,
                corrections: Vec::new(),
                is_valid: false,
            };
        }

        let len = normalized.chars().count();
        if !(MIN_LENGTH..=MAX_LENGTH).contains(&len) {
            return ValidationResult {
                text: normalized,
                original_text,
                confidence: 0.3 * ocr_confidence,
                region: None,
                format_name: None,
                corrections: Vec::new(),
                is_valid: false,
            };
        }

        let matched = match region {
            Some(r) => self.registry.match_with_region(&normalized, r),
            None => self.registry.match_text(&normalized),
        };

        match matched {
            None => self.no_rule_result(normalized, original_text, ocr_confidence),
            Some((rule, score)) if (score - 1.0).abs() < 1e-6 => ValidationResult {
                text: normalized,
                original_text,
                confidence: ocr_confidence,
                region: Some(rule.region().to_string()),
                format_name: Some(rule.format_name().to_string()),
                corrections: Vec::new(),
                is_valid: true,
            },
            Some((rule, score)) => self.soft_match_result(normalized, original_text, ocr_confidence, rule, score),
        }
    }

    pub fn validate_batch(
        &self,
        candidates: &[(String, f32)],
        region: Option<&str>,
    ) -> Vec<ValidationResult> {
        let mut results: Vec<ValidationResult> = candidates
            .iter()
            .map(|(text, conf)| self.validate(text, *conf, region))
            .filter(|r| r.is_valid || r.confidence > 0.0)
            .collect();

        results.sort_by(|a, b| {
            b.is_valid.cmp(&a.is_valid).then(b.confidence.partial_cmp(&a.confidence).unwrap())
        });
        results
    }

    fn no_rule_result(&self, normalized: String, original_text: String, ocr_confidence: f32) -> ValidationResult {
        let confidence = fallback_confidence(&normalized, ocr_confidence);
        ValidationResult {
            text: normalized,
            original_text,
            confidence,
            region: None,
            format_name: None,
            corrections: Vec::new(),
            is_valid: false,
        }
    }

    fn soft_match_result(
        &self,
        normalized: String,
        original_text: String,
        ocr_confidence: f32,
        rule: std::sync::Arc<dyn PlateRule>,
        match_score: f32,
    ) -> ValidationResult {
        let (corrected, corrections) = apply_corrections(&normalized, rule.as_ref());

        if rule.pattern().is_match(&corrected) {
            let confidence =
                (ocr_confidence * match_score - CORRECTION_PENALTY * corrections.len() as f32).max(0.0);
            ValidationResult {
                text: corrected,
                original_text,
                confidence,
                region: Some(rule.region().to_string()),
                format_name: Some(rule.format_name().to_string()),
                corrections,
                is_valid: true,
            }
        } else {
            self.no_rule_result(normalized, original_text, ocr_confidence)
        }
    }
}

fn fallback_confidence(normalized: &str, ocr_confidence: f32) -> f32 {
    let has_letters = normalized.chars().any(|c| c.is_ascii_alphabetic());
    let has_digits = normalized.chars().any(|c| c.is_ascii_digit());
    if has_letters && has_digits {
        0.5 * ocr_confidence
    } else {
        0.0
    }
}

/// Applies `rule`'s correction table position-by-position. A character
/// already in its expected class is never touched; only a digit-shaped
/// character in a letter slot (or vice versa) is looked up in the
/// appropriate table.
fn apply_corrections(text: &str, rule: &dyn PlateRule) -> (String, Vec<CorrectionInfo>) {
    let mut chars: Vec<char> = text.chars().collect();
    let mut corrections = Vec::new();

    for (position, expected) in (0..chars.len()).filter_map(|i| rule.position_type(i).map(|c| (i, c))) {
        let current = chars[position];
        let replacement = match expected {
            CharClass::Letter if current.is_ascii_digit() => rule.digit_to_letter_table().get(&current).copied(),
            CharClass::Digit if current.is_ascii_alphabetic() => {
                rule.letter_to_digit_table().get(&current).copied()
            }
            _ => None,
        };

        if let Some(corrected) = replacement {
            corrections.push(CorrectionInfo {
                position,
                original: current,
                corrected,
                reason: format!("{:?} slot expects {:?}", current, expected),
            });
            chars[position] = corrected;
        }
    }

    (chars.into_iter().collect(), corrections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PlateValidator<'static> {
        PlateValidator::new(&FORMAT_REGISTRY)
    }

    #[test]
    fn normalization_is_idempotent_and_alphanumeric_upper_only() {
        let once = normalize("abc-1d23!");
        let twice = normalize(&once);
        assert_eq!(once, twice);
        assert!(once.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn exact_mercosul_match_returns_full_confidence() {
        let result = validator().validate("ABC1D23", 0.9, Some("BR"));
        assert!(result.is_valid);
        assert_eq!(result.text, "ABC1D23");
        assert_eq!(result.format_name.as_deref(), Some("BR_MERCOSUL"));
        assert_eq!(result.region.as_deref(), Some("BR"));
        assert_eq!(result.confidence, 0.9);
        assert!(result.corrections.is_empty());
    }

    #[test]
    fn old_format_with_confusable_is_corrected_and_scored() {
        let result = validator().validate("ABCI234", 0.8, Some("BR"));
        assert!(result.is_valid);
        assert_eq!(result.text, "ABC1234");
        assert_eq!(result.format_name.as_deref(), Some("BR_OLD"));
        assert_eq!(result.corrections.len(), 1);
        assert_eq!(result.corrections[0].position, 3);
        assert_eq!(result.corrections[0].original, 'I');
        assert_eq!(result.corrections[0].corrected, '1');
        // match_score is the soft pre-correction score (0.9), not 1.0.
        assert!((result.confidence - (0.8 * 0.9 - 0.05)).abs() < 1e-4);
    }

    #[test]
    fn blacklisted_text_is_rejected_with_zero_confidence() {
        let result = validator().validate("BRASIL", 0.95, Some("BR"));
        assert!(!result.is_valid);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn out_of_range_length_is_rejected_with_scaled_confidence() {
        let result = validator().validate("ABC12", 0.9, Some("BR"));
        assert!(!result.is_valid);
        assert!((result.confidence - 0.27).abs() < 1e-4);
    }

    #[test]
    fn validate_batch_sorts_valid_before_invalid_by_confidence() {
        let candidates = vec![
            ("ABC1D23".to_string(), 0.9),
            ("ABC12".to_string(), 0.9),
            ("XYZQQQQ".to_string(), 0.4),
        ];
        let results = validator().validate_batch(&candidates, Some("BR"));
        assert!(results[0].is_valid);
        assert_eq!(results[0].text, "ABC1D23");
    }

    #[test]
    fn corrections_never_flip_a_character_already_in_its_expected_class() {
        // "ABC1D23" already satisfies BR_MERCOSUL exactly; soft-path correction
        // is only reachable for non-exact matches, but we exercise the
        // correction function directly to pin the invariant.
        let rule = rules::BaseBrazilRule::mercosul();
        let (corrected, corrections) = apply_corrections("ABC1D23", &rule);
        assert_eq!(corrected, "ABC1D23");
        assert!(corrections.is_empty());
    }
}
