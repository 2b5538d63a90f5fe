// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token-level word matching.
//!
//! A word is located in a tokenized prompt by encoding a few surface forms
//! of it (as-is, space-prefixed, lower-cased, lower-cased space-prefixed)
//! and searching for each encoding as a contiguous id sub-sequence.  Case
//! is handled through these variants, never by normalizing ids: BPE
//! tokenizers assign different ids to `"blue"` at the start of a prompt and
//! `" blue"` after a space, and the variants cover both.

use std::collections::BTreeSet;

use crate::tokenizer::TokenEncoder;

/// Half-open token index interval `[start, end)` where a word was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchRange {
    /// First matched token index.
    pub start: usize,
    /// One past the last matched token index.
    pub end: usize,
}

impl MatchRange {
    /// Create a new range.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of tokens in the range.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range covers no tokens.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Iterate over the covered indices.
    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Encode the surface forms of `word`, dropping failures, empty encodings
/// and duplicates (first occurrence wins).
///
/// A tokenizer error on one variant skips that variant only.
#[must_use]
pub fn encode_variants(tokenizer: &dyn TokenEncoder, word: &str) -> Vec<Vec<u32>> {
    let lower = word.to_lowercase();
    let variants = [
        word.to_owned(),
        format!(" {word}"),
        lower.clone(),
        format!(" {lower}"),
    ];

    let mut seen: BTreeSet<Vec<u32>> = BTreeSet::new();
    let mut out = Vec::with_capacity(variants.len());
    for variant in &variants {
        let ids = match tokenizer.encode_raw(variant) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::trace!(variant = %variant, "variant skipped: {e}");
                continue;
            }
        };
        if !ids.is_empty() && seen.insert(ids.clone()) {
            out.push(ids);
        }
    }
    out
}

/// All start positions where `needle` occurs as a contiguous sub-sequence
/// of `haystack`, as ranges.  Overlapping occurrences are all reported.
#[must_use]
pub fn find_subsequence_all(haystack: &[u32], needle: &[u32]) -> Vec<MatchRange> {
    if haystack.is_empty() || needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(i, _)| MatchRange::new(i, i + needle.len()))
        .collect()
}

/// Every range in `ids` where some surface form of `word` occurs.
///
/// Ranges are reported per variant, in position order within a variant.
/// The same range can appear twice only if two distinct encodings matched
/// at the same place, which cannot happen for exact equality of distinct
/// id sequences of equal length.
///
/// Returns an empty list for an empty word, an empty sequence, or when
/// every encoding is longer than the sequence.
#[must_use]
pub fn find_word_ranges(tokenizer: &dyn TokenEncoder, ids: &[u32], word: &str) -> Vec<MatchRange> {
    if word.is_empty() || ids.is_empty() {
        return Vec::new();
    }
    encode_variants(tokenizer, word)
        .iter()
        .flat_map(|needle| find_subsequence_all(ids, needle))
        .collect()
}

/// Every range for every word in `words`, in word order.
#[must_use]
pub fn find_all_ranges(
    tokenizer: &dyn TokenEncoder,
    ids: &[u32],
    words: &[String],
) -> Vec<MatchRange> {
    words
        .iter()
        .flat_map(|w| find_word_ranges(tokenizer, ids, w))
        .collect()
}

/// Sorted, deduplicated token indices covered by any match of `words`.
#[must_use]
pub fn matched_indices(
    tokenizer: &dyn TokenEncoder,
    ids: &[u32],
    words: &[String],
) -> BTreeSet<usize> {
    find_all_ranges(tokenizer, ids, words)
        .iter()
        .flat_map(MatchRange::indices)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::{CutoffError, Result};

    /// Case-sensitive toy tokenizer: `" x"` and `"x"` are distinct tokens,
    /// and the word `"bad"` always fails to encode.
    struct ToyTokenizer {
        vocab: HashMap<&'static str, Vec<u32>>,
    }

    impl ToyTokenizer {
        fn new() -> Self {
            let mut vocab = HashMap::new();
            vocab.insert("blue", vec![10]);
            vocab.insert(" blue", vec![11]);
            vocab.insert("Blue", vec![12]);
            vocab.insert(" Blue", vec![13]);
            vocab.insert("hair", vec![20]);
            vocab.insert(" hair", vec![21]);
            vocab.insert("skyline", vec![30, 31]);
            vocab.insert(" skyline", vec![32, 31]);
            Self { vocab }
        }
    }

    impl TokenEncoder for ToyTokenizer {
        fn encode_raw(&self, text: &str) -> Result<Vec<u32>> {
            if text.trim() == "bad" {
                return Err(CutoffError::Tokenizer("boom".into()));
            }
            Ok(self.vocab.get(text).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn variants_cover_case_and_spacing() {
        let tok = ToyTokenizer::new();
        let v = encode_variants(&tok, "Blue");
        assert_eq!(v, vec![vec![12], vec![13], vec![10], vec![11]]);
    }

    #[test]
    fn variants_are_deduplicated() {
        let tok = ToyTokenizer::new();
        // "blue" and its lower-case form encode identically.
        let v = encode_variants(&tok, "blue");
        assert_eq!(v, vec![vec![10], vec![11]]);
    }

    #[test]
    fn failing_variants_are_skipped() {
        let tok = ToyTokenizer::new();
        assert!(encode_variants(&tok, "bad").is_empty());
        assert!(find_word_ranges(&tok, &[1, 2, 3], "bad").is_empty());
    }

    #[test]
    fn subsequence_all_occurrences() {
        let hits = find_subsequence_all(&[1, 2, 1, 2, 1], &[1, 2]);
        assert_eq!(hits, vec![MatchRange::new(0, 2), MatchRange::new(2, 4)]);
        let overlapping = find_subsequence_all(&[7, 7, 7], &[7, 7]);
        assert_eq!(overlapping.len(), 2);
    }

    #[test]
    fn subsequence_edge_cases() {
        assert!(find_subsequence_all(&[], &[1]).is_empty());
        assert!(find_subsequence_all(&[1], &[]).is_empty());
        assert!(find_subsequence_all(&[1], &[1, 2]).is_empty());
    }

    #[test]
    fn multi_token_word_match() {
        let tok = ToyTokenizer::new();
        // "skyline" at the start, " skyline" later.
        let ids = [30, 31, 5, 32, 31];
        let ranges = find_word_ranges(&tok, &ids, "skyline");
        assert_eq!(ranges, vec![MatchRange::new(0, 2), MatchRange::new(3, 5)]);
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        let tok = ToyTokenizer::new();
        assert!(find_word_ranges(&tok, &[10], "").is_empty());
        assert!(find_word_ranges(&tok, &[], "blue").is_empty());
    }

    #[test]
    fn matched_indices_union() {
        let tok = ToyTokenizer::new();
        let ids = [10, 21, 5, 11, 20];
        let words = vec!["blue".to_string(), "hair".to_string()];
        let idx: Vec<usize> = matched_indices(&tok, &ids, &words).into_iter().collect();
        assert_eq!(idx, vec![0, 1, 3, 4]);
    }

    #[test]
    fn range_helpers() {
        let r = MatchRange::new(3, 5);
        assert_eq!(r.len(), 2);
        assert!(!r.is_empty());
        assert_eq!(r.indices().collect::<Vec<_>>(), vec![3, 4]);
        assert!(MatchRange::new(4, 4).is_empty());
    }
}
