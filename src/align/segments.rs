// SPDX-License-Identifier: MIT OR Apache-2.0

//! Phrase segmentation of a tokenized prompt.
//!
//! A prompt such as `"blue hair, red dress"` is split into phrases at
//! punctuation and conjunctions so that neighbor expansion around a target
//! word stays inside the target's own phrase.

use crate::align::matching::find_word_ranges;
use crate::tokenizer::TokenEncoder;

/// Surface forms that end a phrase.
pub const BOUNDARY_WORDS: [&str; 5] = [",", ";", " and", " with", " of"];

/// Half-open token index interval `[start, end)` covering one phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    /// First token index of the phrase.
    pub start: usize,
    /// One past the last token index of the phrase.
    pub end: usize,
}

impl Segment {
    /// Create a new segment.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Whether `[start, end)` lies entirely inside this segment.
    #[must_use]
    pub const fn contains_range(&self, start: usize, end: usize) -> bool {
        self.start <= start && end <= self.end
    }

    /// Whether `index` lies inside this segment.
    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// Split `ids` into contiguous, non-overlapping phrases covering `[0, S)`.
///
/// Each boundary match ends its phrase: the cut falls immediately after the
/// separator, so the separator belongs to the phrase it closes.  Without
/// any separator the whole sequence is one segment; an empty sequence has
/// no segments.
#[must_use]
pub fn detect_segments(tokenizer: &dyn TokenEncoder, ids: &[u32]) -> Vec<Segment> {
    let seq_len = ids.len();
    if seq_len == 0 {
        return Vec::new();
    }

    let mut cuts: Vec<usize> = vec![0, seq_len];
    for word in BOUNDARY_WORDS {
        cuts.extend(
            find_word_ranges(tokenizer, ids, word)
                .iter()
                .map(|r| r.end),
        );
    }
    cuts.sort_unstable();
    cuts.dedup();

    cuts.windows(2)
        .filter_map(|w| match *w {
            [start, end] if end > start => Some(Segment::new(start, end)),
            _ => None,
        })
        .collect()
}

/// The first segment containing `[start, end)`, if any.
#[must_use]
pub fn owning_segment(segments: &[Segment], start: usize, end: usize) -> Option<Segment> {
    segments
        .iter()
        .copied()
        .find(|seg| seg.contains_range(start, end))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
