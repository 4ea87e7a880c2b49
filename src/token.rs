//! Rough token estimates for chunk statistics.
//!
//! Chunks are bounded in characters; these estimates only inform dry runs
//! and the run summary about how much each chunk will cost the backend.

use serde::Serialize;
use std::sync::Arc;

const CHARS_PER_TOKEN: usize = 4;
const WORD_MULTIPLIER: f64 = 1.3;
const SPECIAL_DIVISOR: usize = 10;

/// Type of tokenizer to use for estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// Character-based heuristic (~4 chars per token)
    #[default]
    Simple,
    /// Blend of word count, character count and punctuation density
    Enhanced,
}

impl TokenizerKind {
    /// Creates a new estimator of this kind.
    #[must_use]
    pub fn create(self) -> Arc<dyn TokenEstimator> {
        match self {
            Self::Simple => Arc::new(SimpleTokenizer),
            Self::Enhanced => Arc::new(EnhancedTokenizer),
        }
    }
}

/// Estimates token counts in text.
pub trait TokenEstimator: Send + Sync {
    /// Estimates the number of tokens in the given text.
    fn estimate(&self, text: &str) -> usize;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SimpleTokenizer;

impl TokenEstimator for SimpleTokenizer {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

/// Averages a word-based and a character-based estimate, then adds a
/// penalty for punctuation, which source code is dense with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EnhancedTokenizer;

impl TokenEstimator for EnhancedTokenizer {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let mut words = 0usize;
        let mut chars = 0usize;
        let mut special = 0usize;
        let mut in_word = false;

        for c in text.chars() {
            chars += 1;
            if c.is_whitespace() {
                in_word = false;
                continue;
            }
            if !in_word {
                words += 1;
                in_word = true;
            }
            if !c.is_alphanumeric() {
                special += 1;
            }
        }

        let word_estimate = (words as f64 * WORD_MULTIPLIER) as usize;
        let char_estimate = chars / CHARS_PER_TOKEN;

        (word_estimate.saturating_add(char_estimate) / 2)
            .saturating_add(special / SPECIAL_DIVISOR)
            .max(1)
    }
}
