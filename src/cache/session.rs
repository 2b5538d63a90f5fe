// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session store for captured row classifications.

use std::collections::HashMap;

use serde::Serialize;

use crate::hooks::EncoderTag;

/// What the capture hook recorded for one encoder.
///
/// Overwritten on every capture; an empty state makes the blend a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Protected rows, ascending.
    pub source: Vec<usize>,
    /// Rows to neutralize, ascending.
    pub victim: Vec<usize>,
    /// Canonical target string the rows were computed for.
    pub targets_canon: String,
    /// Prompt with the targets blanked out.
    pub dummy_text: String,
    /// Sequence length at capture time.
    pub seq_len: usize,
    /// Number of target matches found.
    pub hits: usize,
    /// Request the capture belongs to (see [`Cutoff`](crate::Cutoff)).
    pub request: u64,
}

impl SessionState {
    /// Whether nothing was captured (no victim rows and no dummy text).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.victim.is_empty() && self.dummy_text.is_empty()
    }

    /// A cleared state that still remembers which targets it was built for.
    #[must_use]
    pub fn cleared(targets_canon: impl Into<String>) -> Self {
        Self {
            targets_canon: targets_canon.into(),
            ..Self::default()
        }
    }
}

/// Per-encoder [`SessionState`] map.
///
/// Single-writer: the capture hook writes through `&mut self`, the blend
/// hook reads through `&self`.  Hosts that share a store across threads
/// wrap it in their own lock.
///
/// # Example
///
/// ```
/// use candle_cutoff::{EncoderTag, SessionState, SessionStore};
///
/// let mut store = SessionStore::new();
/// store.set(EncoderTag::Secondary, SessionState::cleared("blue"));
/// assert_eq!(store.get(EncoderTag::Secondary).targets_canon, "blue");
/// assert!(store.get(EncoderTag::Primary).is_empty());
/// assert_eq!(store.last_tag(), Some(EncoderTag::Secondary));
/// ```
#[derive(Debug, Default)]
pub struct SessionStore {
    states: HashMap<EncoderTag, SessionState>,
    empty: SessionState,
    last_tag: Option<EncoderTag>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the state for `tag`.
    pub fn set(&mut self, tag: EncoderTag, state: SessionState) {
        self.states.insert(tag, state);
        self.last_tag = Some(tag);
    }

    /// State for `tag`; an empty state if nothing was captured.
    #[must_use]
    pub fn get(&self, tag: EncoderTag) -> &SessionState {
        self.states.get(&tag).unwrap_or(&self.empty)
    }

    /// Whether a state was captured for `tag` since the last reset.
    #[must_use]
    pub fn contains(&self, tag: EncoderTag) -> bool {
        self.states.contains_key(&tag)
    }

    /// Drop the state for `tag`.
    pub fn reset(&mut self, tag: EncoderTag) {
        self.states.remove(&tag);
        if self.last_tag == Some(tag) {
            self.last_tag = None;
        }
    }

    /// Drop every state.
    pub fn clear(&mut self) {
        self.states.clear();
        self.last_tag = None;
    }

    /// Tag of the most recent [`set`](Self::set), for diagnostics.
    #[must_use]
    pub const fn last_tag(&self) -> Option<EncoderTag> {
        self.last_tag
    }

    /// Tags with a captured state, in tag order.
    #[must_use]
    pub fn tags(&self) -> Vec<EncoderTag> {
        let mut tags: Vec<EncoderTag> = self.states.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}
