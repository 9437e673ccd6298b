//! Patient name normalizer.
//!
//! Produces three canonical keys per name:
//! - strict: case/diacritic/whitespace folding only (high-confidence matching)
//! - loose:  strict minus punctuation, digits, and stop words (candidate generation)
//! - compact: loose with spaces removed (run-together variant detection)

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

/// Name normalizer with a configurable stop-word set.
pub struct NameNormalizer {
    /// Connective words dropped from loose keys.
    stop_words: HashSet<String>,
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl NameNormalizer {
    /// Create a normalizer with the default stop-word set.
    pub fn new() -> Self {
        Self {
            stop_words: Self::default_stop_words(),
        }
    }

    /// Strict canonical key: uppercase, diacritics stripped, whitespace
    /// collapsed. Total - empty input yields an empty string.
    pub fn strict_key(&self, raw: &str) -> String {
        let upper = raw.to_uppercase();
        let stripped: String = upper
            .nfd()
            .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
            .collect();
        collapse_whitespace(&stripped)
    }

    /// Loose key: strict key with digits and punctuation removed and stop
    /// words dropped. Used only for candidate generation, never as sole
    /// merge evidence.
    pub fn loose_key(&self, raw: &str) -> String {
        let strict = self.strict_key(raw);
        let cleaned: String = strict
            .chars()
            .map(|c| {
                if c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '/' | '\\' | '(' | ')') {
                    ' '
                } else {
                    c
                }
            })
            .collect();
        let words: Vec<&str> = cleaned
            .split_whitespace()
            .filter(|w| !self.stop_words.contains(*w))
            .collect();
        words.join(" ")
    }

    /// Compact key: loose key with all spaces removed.
    pub fn compact_key(&self, raw: &str) -> String {
        self.loose_key(raw).replace(' ', "")
    }

    /// Add a custom stop word.
    pub fn add_stop_word(&mut self, word: &str) {
        self.stop_words.insert(word.to_uppercase());
    }

    /// Default stop words: Portuguese connective articles seen between
    /// name parts at intake.
    fn default_stop_words() -> HashSet<String> {
        ["DE", "DA", "DO", "DAS", "DOS", "DES", "E"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
