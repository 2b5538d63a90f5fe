// SPDX-License-Identifier: MIT OR Apache-2.0

//! Distance decay of the blend weight.
//!
//! Victim rows far from any source row receive a weaker blend than rows
//! right next to a target.  Distances are normalized by the spread of the
//! source rows, so the falloff adapts to how much of the prompt the
//! targets occupy.

use std::f32::consts::PI;

use crate::config::DecayMode;

/// Lowest per-row weight produced with decay on.
///
/// Rows far from every source would otherwise get a weight so small the
/// blend has no visible effect.
pub const MIN_DECAYED_ALPHA: f32 = 0.15;

/// Blend weight for a set of victim rows.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum BlendWeights {
    /// One weight for every row.
    Uniform(f32),
    /// One weight per row, aligned with the row list.
    PerRow(Vec<f32>),
}

impl BlendWeights {
    /// Weight for the `k`-th row of the row list.
    ///
    /// Returns `None` if `k` is past the end of a per-row list.
    #[must_use]
    pub fn get(&self, k: usize) -> Option<f32> {
        match self {
            Self::Uniform(alpha) => Some(*alpha),
            Self::PerRow(alphas) => alphas.get(k).copied(),
        }
    }
}

/// Compute blend weights for `victim` rows.
///
/// With [`DecayMode::Off`] the result is [`BlendWeights::Uniform`] of
/// `base_alpha`.  Otherwise each row gets
/// `clamp(base_alpha * strength * scale(t), 0.15, 1.0)` where `t` is the
/// distance to the nearest source row divided by the source spread
/// (`max - min`, at least 1), clamped to `[0, 1]`.  With no source rows
/// every victim is treated as maximally distant.
///
/// ```
/// use candle_cutoff::{decay_weights, BlendWeights, DecayMode};
///
/// let w = decay_weights(&[3, 5], &[2], DecayMode::Off, 0.5, 0.6);
/// assert_eq!(w, BlendWeights::Uniform(0.6));
/// ```
#[must_use]
pub fn decay_weights(
    victim: &[usize],
    source: &[usize],
    mode: DecayMode,
    strength: f32,
    base_alpha: f32,
) -> BlendWeights {
    if mode == DecayMode::Off {
        return BlendWeights::Uniform(base_alpha);
    }

    let d_max = source_spread(source);
    let alphas = victim
        .iter()
        .map(|&i| {
            let d = nearest_distance(i, source).unwrap_or(d_max);
            let t = (to_f32(d) / to_f32(d_max)).clamp(0.0, 1.0);
            let scale = match mode {
                DecayMode::Cosine => 0.5 * (1.0 + (PI * t).cos()),
                _ => 1.0 - t,
            };
            (base_alpha * strength * scale).clamp(MIN_DECAYED_ALPHA, 1.0)
        })
        .collect();
    BlendWeights::PerRow(alphas)
}

/// `max(1, max(source) - min(source))`.
fn source_spread(source: &[usize]) -> usize {
    match (source.iter().min(), source.iter().max()) {
        (Some(lo), Some(hi)) => (hi - lo).max(1),
        _ => 1,
    }
}

fn nearest_distance(i: usize, source: &[usize]) -> Option<usize> {
    source.iter().map(|&s| i.abs_diff(s)).min()
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn to_f32(n: usize) -> f32 {
    // CAST: usize → f32, token distances are far below 2^24
    n as f32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn per_row(w: BlendWeights) -> Vec<f32> {
        match w {
            BlendWeights::PerRow(v) => v,
            BlendWeights::Uniform(a) => panic!("expected per-row weights, got uniform {a}"),
        }
    }

    #[test]
    fn off_is_uniform() {
        let w = decay_weights(&[0, 7, 9], &[3], DecayMode::Off, 1.0, 0.4);
        assert_eq!(w, BlendWeights::Uniform(0.4));
        assert_eq!(w.get(2), Some(0.4));
    }

    #[test]
    fn linear_non_increasing_with_floor() {
        // source spread = 10 - 0 = 10
        let victim = [11, 12, 15, 18, 20, 40];
        let w = per_row(decay_weights(&victim, &[0, 10], DecayMode::Linear, 1.0, 1.0));
        assert_eq!(w.len(), victim.len());
        for pair in w.windows(2) {
            assert!(pair[0] >= pair[1], "weights must not increase: {w:?}");
        }
        assert!((w[0] - 0.9).abs() < 1e-6);
        assert!((w[2] - 0.5).abs() < 1e-6);
        assert_eq!(*w.last().unwrap(), MIN_DECAYED_ALPHA);
        assert!(w.iter().all(|&a| a >= MIN_DECAYED_ALPHA));
    }

    #[test]
    fn cosine_midpoint_is_half() {
        // spread 4, victim at distance 2 → t = 0.5 → scale 0.5
        let w = per_row(decay_weights(&[6], &[0, 4], DecayMode::Cosine, 1.0, 1.0));
        assert!((w[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn single_source_uses_unit_spread() {
        // spread 1: distance 1 already saturates t = 1 → floor
        let w = per_row(decay_weights(&[4, 6], &[5], DecayMode::Linear, 1.0, 1.0));
        assert_eq!(w, vec![MIN_DECAYED_ALPHA, MIN_DECAYED_ALPHA]);
    }

    #[test]
    fn empty_source_is_maximally_distant() {
        let w = per_row(decay_weights(&[0, 1], &[], DecayMode::Cosine, 1.0, 1.0));
        assert_eq!(w, vec![MIN_DECAYED_ALPHA, MIN_DECAYED_ALPHA]);
    }

    #[test]
    fn strength_scales_and_ceiling_holds() {
        let w = per_row(decay_weights(&[1], &[0, 10], DecayMode::Linear, 0.5, 1.0));
        assert!((w[0] - 0.45).abs() < 1e-6);
        let w = per_row(decay_weights(&[1], &[0, 100], DecayMode::Linear, 1.0, 1.0));
        assert!(w[0] <= 1.0);
    }

    #[test]
    fn get_past_end_is_none() {
        let w = BlendWeights::PerRow(vec![0.3]);
        assert_eq!(w.get(0), Some(0.3));
        assert_eq!(w.get(1), None);
    }
}
