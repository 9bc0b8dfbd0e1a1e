//! Plate format rules: pattern, per-position expected character class, and
//! the confusable-character correction tables.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{CharClass, CorrectionTable};

/// Digit-shaped character appearing in a letter slot.
static DIGIT_TO_LETTER: Lazy<CorrectionTable> = Lazy::new(|| {
    HashMap::from([('0', 'O'), ('1', 'I'), ('2', 'Z'), ('5', 'S'), ('6', 'G'), ('8', 'B')])
});

/// Letter-shaped character appearing in a digit slot.
static LETTER_TO_DIGIT: Lazy<CorrectionTable> = Lazy::new(|| {
    HashMap::from([
        ('O', '0'),
        ('Q', '0'),
        ('D', '0'),
        ('I', '1'),
        ('L', '1'),
        ('Z', '2'),
        ('S', '5'),
        ('G', '6'),
        ('B', '8'),
    ])
});

pub trait PlateRule: Send + Sync {
    fn region(&self) -> &str;
    fn format_name(&self) -> &str;
    fn pattern(&self) -> &Regex;
    fn expected_length(&self) -> usize;
    fn example(&self) -> &str;
    fn position_type(&self, position: usize) -> Option<CharClass>;
    fn digit_to_letter_table(&self) -> &CorrectionTable;
    fn letter_to_digit_table(&self) -> &CorrectionTable;
}

/// Shared base for Brazilian plate rules, parameterized by the per-position
/// expected-class vector; the Mercosul and old-format rules differ only in
/// that vector and the regular expression.
pub struct BaseBrazilRule {
    region: String,
    format_name: String,
    pattern: Regex,
    positions: Vec<CharClass>,
    example: String,
}

impl BaseBrazilRule {
    fn new(format_name: &str, pattern: &str, positions: Vec<CharClass>, example: &str) -> Self {
        Self {
            region: "BR".to_string(),
            format_name: format_name.to_string(),
            pattern: Regex::new(pattern).expect("static plate pattern must compile"),
            positions,
            example: example.to_string(),
        }
    }

    pub fn mercosul() -> Self {
        Self::new(
            "BR_MERCOSUL",
            r"^[A-Z]{3}\d[A-Z]\d{2}$",
            vec![
                CharClass::Letter,
                CharClass::Letter,
                CharClass::Letter,
                CharClass::Digit,
                CharClass::Letter,
                CharClass::Digit,
                CharClass::Digit,
            ],
            "ABC1D23",
        )
    }

    pub fn old() -> Self {
        Self::new(
            "BR_OLD",
            r"^[A-Z]{3}\d{4}$",
            vec![
                CharClass::Letter,
                CharClass::Letter,
                CharClass::Letter,
                CharClass::Digit,
                CharClass::Digit,
                CharClass::Digit,
                CharClass::Digit,
            ],
            "ABC1234",
        )
    }
}

impl PlateRule for BaseBrazilRule {
    fn region(&self) -> &str {
        &self.region
    }

    fn format_name(&self) -> &str {
        &self.format_name
    }

    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn expected_length(&self) -> usize {
        self.positions.len()
    }

    fn example(&self) -> &str {
        &self.example
    }

    fn position_type(&self, position: usize) -> Option<CharClass> {
        self.positions.get(position).copied()
    }

    fn digit_to_letter_table(&self) -> &CorrectionTable {
        &DIGIT_TO_LETTER
    }

    fn letter_to_digit_table(&self) -> &CorrectionTable {
        &LETTER_TO_DIGIT
    }
}

pub fn brazil_rules() -> Vec<Arc<dyn PlateRule>> {
    vec![Arc::new(BaseBrazilRule::mercosul()), Arc::new(BaseBrazilRule::old())]
}
