// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host hook identity and re-entrancy protection.
//!
//! Provides [`EncoderTag`] (which text encoder produced a token sequence or
//! conditioning tensor) and [`ReentrancyGuard`] (a thread-local marker that
//! keeps the blend stage from recursing into itself when its own dummy
//! re-encode calls back into the host).

use std::cell::Cell;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

// ---------------------------------------------------------------------------
// EncoderTag
// ---------------------------------------------------------------------------

/// Longest sequence still attributed to the primary encoder.
///
/// The primary (CLIP-L style) engine emits 77-token chunks; anything longer
/// comes from the secondary engine.
pub const PRIMARY_MAX_SEQ_LEN: usize = 77;

/// Which of the host's (up to) two text encoders produced a call.
///
/// Displays as the host's `TE1`/`TE2` labels.
///
/// ```
/// use candle_cutoff::EncoderTag;
///
/// assert_eq!(EncoderTag::from_seq_len(77), EncoderTag::Primary);
/// assert_eq!(EncoderTag::from_seq_len(154), EncoderTag::Secondary);
/// assert_eq!(EncoderTag::Primary.to_string(), "TE1");
/// assert_eq!("te2".parse::<EncoderTag>().unwrap(), EncoderTag::Secondary);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EncoderTag {
    /// First text encoder (`TE1`).
    Primary,
    /// Second text encoder (`TE2`).
    Secondary,
}

impl EncoderTag {
    /// Both tags, in store order.
    pub const ALL: [Self; 2] = [Self::Primary, Self::Secondary];

    /// Attribute a sequence to an encoder by its length.
    #[must_use]
    pub const fn from_seq_len(seq_len: usize) -> Self {
        if seq_len <= PRIMARY_MAX_SEQ_LEN {
            Self::Primary
        } else {
            Self::Secondary
        }
    }
}

impl fmt::Display for EncoderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "TE1"),
            Self::Secondary => write!(f, "TE2"),
        }
    }
}

/// Parse a host label into an [`EncoderTag`].
///
/// Anything that is not recognisably the primary encoder maps to
/// [`EncoderTag::Secondary`], matching the host store's coercion.
impl FromStr for EncoderTag {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "te1" | "primary" => Self::Primary,
            _ => Self::Secondary,
        })
    }
}

// ---------------------------------------------------------------------------
// ReentrancyGuard
// ---------------------------------------------------------------------------

thread_local! {
    static INSIDE_BLEND: Cell<bool> = const { Cell::new(false) };
}

/// RAII marker for "this thread is inside the blend stage".
///
/// [`enter`](Self::enter) returns `None` when the thread is already inside,
/// so a nested call can bail out instead of compounding the blend.  The
/// marker is cleared when the guard drops, including on early return.
///
/// ```
/// use candle_cutoff::ReentrancyGuard;
///
/// let outer = ReentrancyGuard::enter().unwrap();
/// assert!(ReentrancyGuard::enter().is_none());
/// drop(outer);
/// assert!(ReentrancyGuard::enter().is_some());
/// ```
#[derive(Debug)]
#[must_use = "the guard releases the marker when dropped"]
pub struct ReentrancyGuard {
    /// Keeps the guard `!Send`: the marker is per-thread.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ReentrancyGuard {
    /// Mark the current thread as inside the blend stage.
    ///
    /// Returns `None` if it already is.
    pub fn enter() -> Option<Self> {
        INSIDE_BLEND.with(|inside| {
            if inside.get() {
                None
            } else {
                inside.set(true);
                Some(Self {
                    _not_send: std::marker::PhantomData,
                })
            }
        })
    }

    /// Whether the current thread is inside the blend stage.
    #[must_use]
    pub fn is_active() -> bool {
        INSIDE_BLEND.with(Cell::get)
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        INSIDE_BLEND.with(|inside| inside.set(false));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
