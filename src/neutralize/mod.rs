// SPDX-License-Identifier: MIT OR Apache-2.0

//! Neutralization of victim rows.
//!
//! - [`neutral`] — Re-encodes the dummy prompt into neutral conditioning.
//! - [`decay`] — Per-row blend weights falling off with distance to the
//!   source rows.
//! - [`blend`] — Lerp/Slerp of selected rows toward neutral rows.

pub mod blend;
pub mod decay;
pub mod neutral;

pub use blend::{blend_rows, blend_uniform, blend_weighted};
pub use decay::{decay_weights, BlendWeights, MIN_DECAYED_ALPHA};
pub use neutral::NeutralProvider;
