// SPDX-License-Identifier: MIT OR Apache-2.0

//! Source/victim row classification.
//!
//! Given a tokenized prompt and the configured word lists, decides which
//! token rows are *source* (the targets and their close neighbors, never
//! touched) and which are *victims* (rows whose conditioning is blended
//! toward the neutral vector).
//!
//! ## Algorithm
//!
//! 1. Every match of every target word, plus the token just before and the
//!    token at the match end, forms the baseline source set.
//! 2. With an expansion distance `N > 0`, each match is instead widened by
//!    `N` tokens on both sides, clipped to the phrase segment that owns it;
//!    the union of widened ranges replaces the baseline.
//! 3. Victims are the complement of the source set.
//! 4. A non-empty processing-target list intersects the victims with that
//!    list's matched rows.
//! 5. A non-empty exclude list removes its matched rows from the victims.
//!
//! Steps 4 and 5 only ever shrink the victim set.

use std::collections::BTreeSet;

use crate::align::matching::{find_all_ranges, matched_indices, MatchRange};
use crate::align::segments::{detect_segments, owning_segment, Segment};
use crate::tokenizer::TokenEncoder;

/// Word lists and expansion distance for one classification.
#[derive(Debug, Clone, Default)]
pub struct RowFilters {
    /// Words whose rows (and neighbors) are protected.
    pub targets: Vec<String>,
    /// Neighbor expansion distance, bounded by the owning phrase.
    pub expand_n: usize,
    /// When non-empty, restrict victims to rows of these words.
    pub processing_targets: Vec<String>,
    /// Rows of these words are never victims.
    pub exclude: Vec<String>,
}

/// Outcome of [`classify_rows`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowClassification {
    /// Protected rows, ascending.
    pub source: Vec<usize>,
    /// Rows to neutralize, ascending.
    pub victim: Vec<usize>,
    /// Number of target matches found.
    pub hits: usize,
    /// Sequence length the rows refer to.
    pub seq_len: usize,
}

/// Classify every row of `ids` as source or victim.
#[must_use]
pub fn classify_rows(
    tokenizer: &dyn TokenEncoder,
    ids: &[u32],
    filters: &RowFilters,
) -> RowClassification {
    let seq_len = ids.len();
    if seq_len == 0 {
        return RowClassification::default();
    }

    let ranges = find_all_ranges(tokenizer, ids, &filters.targets);

    let source: BTreeSet<usize> = if filters.expand_n > 0 && !ranges.is_empty() {
        let segments = detect_segments(tokenizer, ids);
        expanded_source(&ranges, &segments, filters.expand_n, seq_len)
    } else {
        baseline_source(&ranges, seq_len)
    };

    let mut victim: BTreeSet<usize> = (0..seq_len).filter(|i| !source.contains(i)).collect();

    if !filters.processing_targets.is_empty() {
        let keep = matched_indices(tokenizer, ids, &filters.processing_targets);
        victim.retain(|i| keep.contains(i));
    }

    if !filters.exclude.is_empty() {
        let drop = matched_indices(tokenizer, ids, &filters.exclude);
        victim.retain(|i| !drop.contains(i));
    }

    RowClassification {
        source: source.into_iter().collect(),
        victim: victim.into_iter().collect(),
        hits: ranges.len(),
        seq_len,
    }
}

/// Matched rows plus the row before each match and the row at its end,
/// clipped to `[0, seq_len)`.
fn baseline_source(ranges: &[MatchRange], seq_len: usize) -> BTreeSet<usize> {
    let last = seq_len.saturating_sub(1);
    let mut rows = BTreeSet::new();
    for r in ranges {
        rows.extend(r.indices());
        rows.insert(r.start.saturating_sub(1));
        rows.insert(r.end.min(last));
    }
    rows
}

/// Each range widened by `n` on both sides, never leaving its phrase.
///
/// A range that straddles a segment boundary (a multi-token word that
/// contains a separator) falls back to the whole sequence as its bound.
fn expanded_source(
    ranges: &[MatchRange],
    segments: &[Segment],
    n: usize,
    seq_len: usize,
) -> BTreeSet<usize> {
    let whole = Segment::new(0, seq_len);
    let mut rows = BTreeSet::new();
    for r in ranges {
        let bound = owning_segment(segments, r.start, r.end).unwrap_or(whole);
        let lo = r.start.saturating_sub(n).max(bound.start);
        let hi = (r.end + n).min(bound.end);
        rows.extend(lo..hi);
    }
    rows
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
