// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token-level prompt analysis: word matching, phrase segmentation, and
//! source/victim row classification.
//!
//! - [`matching`] — surface-form encodings and id sub-sequence search.
//! - [`segments`] — phrase boundaries at `,`, `;`, `and`, `with`, `of`.
//! - [`rows`] — source and victim row sets.

pub mod matching;
pub mod rows;
pub mod segments;

pub use matching::MatchRange;
pub use rows::{classify_rows, RowClassification, RowFilters};
pub use segments::{detect_segments, Segment};
