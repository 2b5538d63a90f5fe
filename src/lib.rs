// SPDX-License-Identifier: MIT OR Apache-2.0

//! # candle-cutoff
//!
//! Prompt-region neutralization for text-conditioning tensors, built on
//! [candle](https://github.com/huggingface/candle).
//!
//! Attributes in a diffusion prompt leak into neighboring phrases
//! (`"blue hair, red dress"` tends to render a blue dress).  candle-cutoff
//! locates user-chosen target words in the tokenized prompt, protects the
//! rows around them, and pulls every other row of the conditioning toward
//! the encoding of the same prompt with the targets blanked out.  The
//! result weakens cross-phrase leakage without touching the targets'
//! own rows.
//!
//! ## Pipeline
//!
//! - [`Cutoff::observe`] — after each text encoder call: token alignment
//!   ([`align`]), dummy prompt ([`util::dummy`]), stored per encoder
//!   ([`cache`]).
//! - [`Cutoff::blend`] — on the final conditioning: neutral vectors
//!   ([`neutralize::neutral`]), distance decay ([`neutralize::decay`]),
//!   Lerp/Slerp of the victim rows ([`neutralize::blend`]).
//!
//! Both hooks fail open: on any problem the conditioning is returned
//! exactly as the host produced it.

#![warn(missing_docs)]

pub mod align;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod hooks;
pub mod neutralize;
pub mod pipeline;
pub mod tokenizer;
pub mod util;

pub use align::{classify_rows, detect_segments, MatchRange, RowClassification, RowFilters, Segment};
pub use backend::{EncoderPair, TextEncoder, TokenizedLine};
pub use cache::{SessionState, SessionStore};
pub use config::{CutoffConfig, DecayMode, InterpolationMethod, TeAwareMode};
pub use error::{CutoffError, Result};
pub use hooks::{EncoderTag, ReentrancyGuard};
pub use neutralize::{
    blend_rows, blend_uniform, blend_weighted, decay_weights, BlendWeights, NeutralProvider,
};
pub use pipeline::{BlendOutcome, BlendReport, Cutoff, NeutralSource, SkipReason};
pub use tokenizer::{PromptTokenizer, TokenEncoder};
