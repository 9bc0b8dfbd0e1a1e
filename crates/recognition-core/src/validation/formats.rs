//! The format registry: holds `PlateRule` instances keyed by region and
//! scores candidate strings against them.

use std::sync::Arc;

use crate::types::CharClass;
use crate::validation::rules::{brazil_rules, PlateRule};

pub struct PlateFormatRegistry {
    rules: Vec<Arc<dyn PlateRule>>,
}

impl PlateFormatRegistry {
    pub fn with_brazil_defaults() -> Self {
        Self { rules: brazil_rules() }
    }

    pub fn rules_for_region<'a>(&'a self, region: &str) -> Vec<&'a Arc<dyn PlateRule>> {
        self.rules.iter().filter(|r| r.region() == region).collect()
    }

    /// Exact match wins outright with score 1.0; otherwise the best-scoring
    /// rule by the soft length/position formula.
    pub fn match_text(&self, text: &str) -> Option<(Arc<dyn PlateRule>, f32)> {
        self.best_match(text, self.rules.iter().collect())
    }

    pub fn match_with_region(&self, text: &str, region: &str) -> Option<(Arc<dyn PlateRule>, f32)> {
        self.best_match(text, self.rules_for_region(region))
    }

    fn best_match<'a>(
        &self,
        text: &str,
        candidates: Vec<&'a Arc<dyn PlateRule>>,
    ) -> Option<(Arc<dyn PlateRule>, f32)> {
        if candidates.is_empty() {
            return None;
        }

        for rule in &candidates {
            if rule.pattern().is_match(text) {
                return Some((Arc::clone(rule), 1.0));
            }
        }

        candidates
            .into_iter()
            .map(|rule| (Arc::clone(rule), soft_score(text, rule.as_ref())))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
    }
}

impl Default for PlateFormatRegistry {
    fn default() -> Self {
        Self::with_brazil_defaults()
    }
}

fn soft_score(text: &str, rule: &dyn PlateRule) -> f32 {
    let len = text.chars().count();
    let expected = rule.expected_length();
    let length_score = length_score(len, expected);
    if length_score == 0.0 {
        return 0.0;
    }
    let position_score = position_score(text, rule);
    0.3 * length_score + 0.7 * position_score
}

fn length_score(len: usize, expected: usize) -> f32 {
    let diff = (len as i64 - expected as i64).unsigned_abs();
    if diff > 2 {
        return 0.0;
    }
    (1.0 - 0.2 * diff as f32).max(0.0)
}

fn position_score(text: &str, rule: &dyn PlateRule) -> f32 {
    let chars: Vec<char> = text.chars().collect();
    let compare_len = chars.len().min(rule.expected_length());
    if compare_len == 0 {
        return 0.0;
    }
    let matches = (0..compare_len)
        .filter(|&i| {
            rule.position_type(i)
                .map(|expected| matches_class(chars[i], expected))
                .unwrap_or(false)
        })
        .count();
    matches as f32 / compare_len as f32
}

fn matches_class(c: char, class: CharClass) -> bool {
    match class {
        CharClass::Letter => c.is_ascii_alphabetic(),
        CharClass::Digit => c.is_ascii_digit(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_mercosul_string_scores_one() {
        let registry = PlateFormatRegistry::with_brazil_defaults();
        let (rule, score) = registry.match_text("ABC1D23").unwrap();
        assert_eq!(rule.format_name(), "BR_MERCOSUL");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn exact_old_format_string_scores_one() {
        let registry = PlateFormatRegistry::with_brazil_defaults();
        let (rule, score) = registry.match_text("ABC1234").unwrap();
        assert_eq!(rule.format_name(), "BR_OLD");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn soft_match_scores_old_format_for_single_confusable_substitution() {
        let registry = PlateFormatRegistry::with_brazil_defaults();
        let (rule, score) = registry.match_text("ABCI234").unwrap();
        assert_eq!(rule.format_name(), "BR_OLD");
        assert!(score > 0.8 && score < 1.0);
    }

    #[test]
    fn length_far_outside_expected_scores_zero() {
        assert_eq!(length_score(3, 7), 0.0);
    }

    #[test]
    fn region_restricted_match_ignores_rules_outside_region() {
        let registry = PlateFormatRegistry::with_brazil_defaults();
        assert!(registry.match_with_region("ABC1D23", "US").is_none());
    }
}
