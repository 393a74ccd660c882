//! # Text Consolidation Module
//!
//! This module merges the outputs of the OCR matrix into a minimal set of
//! non-duplicate text blocks. Running the same card through 25 recognition
//! passes produces many near-identical strings; only one copy of each, and
//! only the most complete version of fragments, is kept.

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use tracing::debug;

/// Default similarity at or above which two blocks count as duplicates
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Configuration for block consolidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Normalized similarity (0.0-1.0) at which blocks are merged
    pub similarity_threshold: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl ConsolidationConfig {
    pub fn validate(&self) -> AppResult<()> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(AppError::Config(format!(
                "similarity_threshold must be in (0.0, 1.0], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// A block prepared for comparison
#[derive(Debug, Clone)]
struct Candidate<'a> {
    /// Position in the input
    index: usize,
    text: &'a str,
    /// Lowercased alphanumerics only
    compact: String,
    chars: Vec<char>,
    length: usize,
}

impl<'a> Candidate<'a> {
    fn new(index: usize, text: &'a str) -> Self {
        let compact = compact_text(text);
        let chars: Vec<char> = compact.chars().collect();
        Self {
            index,
            text,
            length: chars.len(),
            compact,
            chars,
        }
    }
}

/// Case-fold and drop everything that is not a letter or digit
pub fn compact_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Merges near-duplicate OCR blocks
#[derive(Debug, Clone, Default)]
pub struct TextConsolidator {
    config: ConsolidationConfig,
}

impl TextConsolidator {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self { config }
    }

    /// Return the retained blocks, in input order.
    ///
    /// Longer blocks are considered first so that a fragment is always
    /// compared against the block that contains it. Among blocks with the
    /// same content the first one encountered is kept.
    pub fn consolidate<S: AsRef<str>>(&self, blocks: &[S]) -> Vec<String> {
        let mut candidates: Vec<Candidate> = blocks
            .iter()
            .enumerate()
            .map(|(index, block)| Candidate::new(index, block.as_ref().trim()))
            .filter(|candidate| candidate.length > 0)
            .collect();

        candidates.sort_by(|a, b| {
            (Reverse(a.length), &a.compact, a.index).cmp(&(Reverse(b.length), &b.compact, b.index))
        });

        let mut kept: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            if !kept.iter().any(|existing| self.covers(existing, &candidate)) {
                kept.push(candidate);
            }
        }

        kept.sort_by_key(|candidate| candidate.index);

        debug!(
            input_blocks = blocks.len(),
            retained_blocks = kept.len(),
            "Consolidated OCR blocks"
        );

        kept.into_iter()
            .map(|candidate| candidate.text.to_string())
            .collect()
    }

    /// Whether `kept` already carries the information in `candidate`.
    /// `kept` is never shorter than `candidate`.
    fn covers(&self, kept: &Candidate, candidate: &Candidate) -> bool {
        if kept.compact.contains(candidate.compact.as_str()) {
            return true;
        }

        let threshold = self.config.similarity_threshold;

        // Levenshtein similarity cannot reach the threshold past this length ratio
        let ratio = candidate.length as f64 / kept.length as f64;
        if ratio >= threshold && strsim::normalized_levenshtein(&kept.compact, &candidate.compact) >= threshold
        {
            return true;
        }

        fragment_similarity(&candidate.chars, &kept.chars) >= threshold
    }
}

/// How well `fragment` matches its closest substring of `container`:
/// `1 - edits / len(fragment)`, where the match may start and end anywhere
/// in `container`.
fn fragment_similarity(fragment: &[char], container: &[char]) -> f64 {
    if fragment.is_empty() {
        return 0.0;
    }

    // Row 0 is all zeros so the match may begin at any container offset
    let mut previous = vec![0usize; container.len() + 1];
    let mut current = vec![0usize; container.len() + 1];
    for (i, f) in fragment.iter().enumerate() {
        current[0] = i + 1;
        for (j, c) in container.iter().enumerate() {
            let substitution = previous[j] + usize::from(f != c);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    let edits = previous.iter().copied().min().unwrap_or(fragment.len());
    1.0 - edits as f64 / fragment.len() as f64
}

/// Consolidate with the default configuration
pub fn consolidate<S: AsRef<str>>(blocks: &[S]) -> Vec<String> {
    TextConsolidator::default().consolidate(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_text() {
        assert_eq!(compact_text("ACME Inc.\n  John-Doe"), "acmeincjohndoe");
        assert_eq!(compact_text("株式会社 サンプル"), "株式会社サンプル");
        assert_eq!(compact_text(" -- "), "");
    }

    #[test]
    fn test_whitespace_and_case_variants_collapse() {
        let result = consolidate(&["ACME Inc\nJohn Doe", "acme inc   john doe"]);
        assert_eq!(result, vec!["ACME Inc\nJohn Doe".to_string()]);
    }

    #[test]
    fn test_fragment_is_absorbed_by_container() {
        let blocks = [
            "John Doe",
            "ACME Inc\nJohn Doe\nSales Manager",
            "Tokyo 100-0001",
        ];
        let result = consolidate(&blocks);
        assert_eq!(
            result,
            vec![
                "ACME Inc\nJohn Doe\nSales Manager".to_string(),
                "Tokyo 100-0001".to_string()
            ]
        );
    }

    #[test]
    fn test_near_duplicate_with_ocr_noise_is_merged() {
        let blocks = [
            "ACME Corporation\nJohn Doe\nSales Manager\njohn@acme.example",
            "ACME Corporatlon\nJohn Doe\nSales Manager\njohn@acme.example",
        ];
        let result = consolidate(&blocks);
        assert_eq!(result.len(), 1);
        assert!(result[0].contains("Corporation"));
    }

    #[test]
    fn test_noisy_fragment_is_absorbed_by_container() {
        let blocks = [
            "ACME Corporation\nJohn Doe\nSales Manager\njohn@acme.example",
            "Sales Manaqer\njohn@acme.example",
        ];
        let result = consolidate(&blocks);
        assert_eq!(result, vec![blocks[0].to_string()]);
    }

    #[test]
    fn test_distinct_numbers_with_shared_digits_are_kept() {
        let blocks = ["TEL 03-1234-9999 FAX 03-5678-1234", "TEL 03-1234-5678"];
        assert_eq!(consolidate(&blocks).len(), 2);

        let blocks = ["TEL 03-1234-5678", "TEL 03-1234-9999 FAX 03-5678-1234"];
        assert_eq!(consolidate(&blocks).len(), 2);
    }

    #[test]
    fn test_fragment_similarity() {
        let container: Vec<char> = "tel0312349999fax0356781234".chars().collect();
        let exact: Vec<char> = "fax0356781234".chars().collect();
        let other: Vec<char> = "tel0312345678".chars().collect();

        assert_eq!(fragment_similarity(&exact, &container), 1.0);
        assert!(fragment_similarity(&other, &container) < 0.75);
        assert_eq!(fragment_similarity(&[], &container), 0.0);
    }

    #[test]
    fn test_unrelated_blocks_are_kept() {
        let blocks = ["ACME Inc", "Globex Corporation", "03-1234-5678"];
        assert_eq!(consolidate(&blocks).len(), 3);
    }

    #[test]
    fn test_first_encountered_wins_on_equal_content() {
        let result = consolidate(&["acme inc", "ACME INC"]);
        assert_eq!(result, vec!["acme inc".to_string()]);

        let result = consolidate(&["ACME INC", "acme inc"]);
        assert_eq!(result, vec!["ACME INC".to_string()]);
    }

    #[test]
    fn test_order_independent_retained_set() {
        let blocks = vec![
            "John Doe".to_string(),
            "ACME Inc\nJohn Doe\nSales".to_string(),
            "Tokyo 100-0001".to_string(),
            "Sales".to_string(),
            "john@acme.example".to_string(),
        ];
        let mut reversed = blocks.clone();
        reversed.reverse();

        let mut forward = consolidate(&blocks);
        let mut backward = consolidate(&reversed);
        forward.sort();
        backward.sort();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 3);
    }

    #[test]
    fn test_blank_blocks_are_dropped() {
        let result = consolidate(&["", "  \n ", "ACME"]);
        assert_eq!(result, vec!["ACME".to_string()]);
        assert!(consolidate::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(ConsolidationConfig::default().validate().is_ok());
        let invalid = ConsolidationConfig {
            similarity_threshold: 1.5,
        };
        assert!(invalid.validate().is_err());
        let zero = ConsolidationConfig {
            similarity_threshold: 0.0,
        };
        assert!(zero.validate().is_err());
    }
}
