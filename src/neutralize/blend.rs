// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector blender.
//!
//! Pulls selected sequence rows of a conditioning tensor toward neutral
//! rows, by linear or spherical interpolation.  Rows not listed are left
//! bit-for-bit untouched.
//!
//! Candle has no `acos`, so the blend runs on extracted `f32` rows and the
//! result is written back as a new tensor with the original dtype and
//! device.

use candle_core::{DType, Tensor};

use crate::config::InterpolationMethod;
use crate::error::{CutoffError, Result};
use crate::neutralize::decay::BlendWeights;

/// Lower bound for norms and `sin ω`.
const EPS: f32 = 1e-7;

/// Below this `sin ω` the vectors are treated as parallel and Slerp
/// degrades to Lerp.
const NEAR_PARALLEL: f32 = 1e-4;

/// Blend `rows` of `cond` with one weight for every row.
///
/// See [`blend_rows`].
///
/// # Errors
///
/// Same as [`blend_rows`].
pub fn blend_uniform(
    cond: &mut Tensor,
    rows: &[usize],
    method: InterpolationMethod,
    alpha: f32,
    neutral: Option<&Tensor>,
) -> Result<()> {
    blend_rows(cond, rows, method, &BlendWeights::Uniform(alpha), neutral)
}

/// Blend `rows` of `cond` with a weight per row (`alphas[k]` for
/// `rows[k]`).
///
/// # Errors
///
/// Same as [`blend_rows`], plus [`CutoffError::Shape`] if `alphas` and
/// `rows` differ in length.
pub fn blend_weighted(
    cond: &mut Tensor,
    rows: &[usize],
    method: InterpolationMethod,
    alphas: &[f32],
    neutral: Option<&Tensor>,
) -> Result<()> {
    if alphas.len() != rows.len() {
        return Err(CutoffError::Shape(format!(
            "{} weights for {} rows",
            alphas.len(),
            rows.len()
        )));
    }
    blend_rows(
        cond,
        rows,
        method,
        &BlendWeights::PerRow(alphas.to_vec()),
        neutral,
    )
}

/// Replace `cond[:, rows, :]` with its blend toward `neutral`.
///
/// `neutral` holds the target rows aligned with `rows` (`neutral[:, k]`
/// pairs with `rows[k]`); its batch may be 1 and is then shared by every
/// batch entry.  With `None`, each batch entry's mean over all sequence
/// positions is the target for every row.  Weights are clamped to
/// `[0, 1]`.  The neutral tensor is moved to `cond`'s device.
///
/// An empty row list leaves `cond` unchanged.
///
/// # Shapes
/// - `cond`: `[batch, seq, hidden]`, rewritten in place with the same
///   shape and dtype
/// - `neutral`: `[batch | 1, rows.len(), hidden]`
///
/// # Errors
///
/// Returns [`CutoffError::Shape`] if `cond` is not 3D, a row is out of
/// range, the weights do not cover every row, or `neutral` has the wrong
/// shape; [`CutoffError::Model`] on tensor failures.
#[allow(clippy::indexing_slicing)] // bounds validated against dims above
pub fn blend_rows(
    cond: &mut Tensor,
    rows: &[usize],
    method: InterpolationMethod,
    weights: &BlendWeights,
    neutral: Option<&Tensor>,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let (batch, seq, hidden) = dims3(cond)?;
    if let Some(&bad) = rows.iter().find(|&&r| r >= seq) {
        return Err(CutoffError::Shape(format!(
            "row {bad} out of range for sequence length {seq}"
        )));
    }
    let alphas = rows
        .iter()
        .enumerate()
        .map(|(k, _)| weights.get(k).map(|a| a.clamp(0.0, 1.0)))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| CutoffError::Shape(format!("weights do not cover {} rows", rows.len())))?;

    let original_dtype = cond.dtype();
    let device = cond.device().clone();

    // PROMOTE: trigonometry and norms need f32
    let mut data: Vec<Vec<Vec<f32>>> = cond.to_dtype(DType::F32)?.to_vec3()?;

    let targets = match neutral {
        Some(n) => neutral_rows(n, &device, batch, rows.len(), hidden)?,
        None => mean_rows(&data, rows.len()),
    };

    for (b, batch_rows) in data.iter_mut().enumerate() {
        let batch_targets = &targets[b.min(targets.len() - 1)];
        for (k, &row) in rows.iter().enumerate() {
            let mixed = match method {
                InterpolationMethod::Lerp => lerp(&batch_rows[row], &batch_targets[k], alphas[k]),
                InterpolationMethod::Slerp => slerp(&batch_rows[row], &batch_targets[k], alphas[k]),
            };
            batch_rows[row] = mixed;
        }
    }

    *cond = Tensor::new(data, &device)?.to_dtype(original_dtype)?;
    Ok(())
}

/// `(batch, seq, hidden)` of a 3D tensor.
fn dims3(t: &Tensor) -> Result<(usize, usize, usize)> {
    match *t.dims() {
        [b, s, h] => Ok((b, s, h)),
        ref other => Err(CutoffError::Shape(format!(
            "conditioning must be [batch, seq, hidden], got {other:?}"
        ))),
    }
}

/// Extract neutral rows after shape checks; a batch of 1 is kept as-is
/// and shared by every conditioning batch entry.
fn neutral_rows(
    neutral: &Tensor,
    device: &candle_core::Device,
    batch: usize,
    k: usize,
    hidden: usize,
) -> Result<Vec<Vec<Vec<f32>>>> {
    let (nb, nk, nh) = dims3(neutral)?;
    if (nb != batch && nb != 1) || nk != k || nh != hidden {
        return Err(CutoffError::Shape(format!(
            "neutral rows {:?} do not fit [{batch}, {k}, {hidden}]",
            neutral.dims()
        )));
    }
    // PROMOTE: align device and dtype with the conditioning
    Ok(neutral.to_device(device)?.to_dtype(DType::F32)?.to_vec3()?)
}

/// Per-batch mean over the sequence axis, repeated `k` times.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn mean_rows(data: &[Vec<Vec<f32>>], k: usize) -> Vec<Vec<Vec<f32>>> {
    data.iter()
        .map(|batch_rows| {
            let hidden = batch_rows.first().map_or(0, Vec::len);
            let mut mean = vec![0.0_f32; hidden];
            for row in batch_rows {
                for (m, v) in mean.iter_mut().zip(row) {
                    *m += v;
                }
            }
            // CAST: usize → f32, sequence lengths are small
            let n = batch_rows.len().max(1) as f32;
            for m in &mut mean {
                *m /= n;
            }
            vec![mean; k]
        })
        .collect()
}

/// `(1 - α)·o + α·n`.
fn lerp(o: &[f32], n: &[f32], alpha: f32) -> Vec<f32> {
    o.iter()
        .zip(n)
        .map(|(&a, &b)| (1.0 - alpha) * a + alpha * b)
        .collect()
}

/// Spherical interpolation on the directions of `o` and `n`, rescaled to
/// the norm of `o`.  Falls back to [`lerp`] for (anti)parallel vectors.
fn slerp(o: &[f32], n: &[f32], alpha: f32) -> Vec<f32> {
    let o_norm = norm(o).max(EPS);
    let n_norm = norm(n).max(EPS);
    let dot = o
        .iter()
        .zip(n)
        .map(|(&a, &b)| (a / o_norm) * (b / n_norm))
        .sum::<f32>()
        .clamp(-1.0, 1.0);
    let omega = dot.acos();
    let sin_omega = omega.sin().max(EPS);
    if sin_omega < NEAR_PARALLEL {
        return lerp(o, n, alpha);
    }
    let t1 = ((1.0 - alpha) * omega).sin() / sin_omega;
    let t2 = (alpha * omega).sin() / sin_omega;
    o.iter()
        .zip(n)
        .map(|(&a, &b)| (t1 * (a / o_norm) + t2 * (b / n_norm)) * o_norm)
        .collect()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use candle_core::Device;

    use super::*;

    /// `[1, 3, 2]` conditioning with rows (1,0), (0,1), (2,2).
    fn cond() -> Tensor {
        Tensor::new(&[[[1.0_f32, 0.0], [0.0, 1.0], [2.0, 2.0]]], &Device::Cpu).unwrap()
    }

    fn rows_of(t: &Tensor) -> Vec<Vec<f32>> {
        t.get(0).unwrap().to_vec2().unwrap()
    }

    fn close(a: &[f32], b: &[f32]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn lerp_alpha_zero_is_identity() {
        let mut t = cond();
        let n = Tensor::new(&[[[5.0_f32, 5.0]]], &Device::Cpu).unwrap();
        blend_uniform(&mut t, &[0], InterpolationMethod::Lerp, 0.0, Some(&n)).unwrap();
        assert_eq!(rows_of(&t), rows_of(&cond()));
    }

    #[test]
    fn lerp_alpha_one_copies_neutral_only_on_listed_rows() {
        let mut t = cond();
        let n = Tensor::new(&[[[5.0_f32, 6.0]]], &Device::Cpu).unwrap();
        blend_uniform(&mut t, &[1], InterpolationMethod::Lerp, 1.0, Some(&n)).unwrap();
        let rows = rows_of(&t);
        assert_eq!(rows[1], vec![5.0, 6.0]);
        assert_eq!(rows[0], vec![1.0, 0.0]);
        assert_eq!(rows[2], vec![2.0, 2.0]);
    }

    #[test]
    fn alpha_is_clamped() {
        let mut t = cond();
        let n = Tensor::new(&[[[5.0_f32, 6.0]]], &Device::Cpu).unwrap();
        blend_uniform(&mut t, &[1], InterpolationMethod::Lerp, 3.0, Some(&n)).unwrap();
        assert_eq!(rows_of(&t)[1], vec![5.0, 6.0]);
    }

    #[test]
    fn mean_fallback_uses_whole_sequence() {
        let mut t = cond();
        blend_uniform(&mut t, &[0, 1], InterpolationMethod::Lerp, 1.0, None).unwrap();
        let rows = rows_of(&t);
        assert!(close(&rows[0], &[1.0, 1.0]));
        assert!(close(&rows[1], &[1.0, 1.0]));
        assert_eq!(rows[2], vec![2.0, 2.0]);
    }

    #[test]
    fn slerp_parallel_matches_lerp() {
        let base = Tensor::new(&[[[1.0_f32, 0.0], [3.0, 3.0]]], &Device::Cpu).unwrap();
        let n = Tensor::new(&[[[2.0_f32, 0.0]]], &Device::Cpu).unwrap();
        let mut a = base.clone();
        let mut b = base;
        blend_uniform(&mut a, &[0], InterpolationMethod::Slerp, 0.3, Some(&n)).unwrap();
        blend_uniform(&mut b, &[0], InterpolationMethod::Lerp, 0.3, Some(&n)).unwrap();
        assert!(close(&rows_of(&a)[0], &rows_of(&b)[0]));
        assert!(close(&rows_of(&a)[0], &[1.3, 0.0]));
    }

    #[test]
    fn slerp_keeps_norm_and_rotates() {
        // (1,0) toward (0,1) halfway → (√½, √½), norm 1
        let mut t = cond();
        let n = Tensor::new(&[[[0.0_f32, 3.0]]], &Device::Cpu).unwrap();
        blend_uniform(&mut t, &[0], InterpolationMethod::Slerp, 0.5, Some(&n)).unwrap();
        let r = &rows_of(&t)[0];
        let h = std::f32::consts::FRAC_1_SQRT_2;
        assert!(close(r, &[h, h]), "{r:?}");
    }

    #[test]
    fn slerp_alpha_zero_is_identity() {
        let mut t = cond();
        let n = Tensor::new(&[[[0.0_f32, 3.0]]], &Device::Cpu).unwrap();
        blend_uniform(&mut t, &[2], InterpolationMethod::Slerp, 0.0, Some(&n)).unwrap();
        assert!(close(&rows_of(&t)[2], &[2.0, 2.0]));
    }

    #[test]
    fn weighted_applies_per_row() {
        let mut t = cond();
        let n = Tensor::new(&[[[0.0_f32, 0.0], [0.0, 0.0]]], &Device::Cpu).unwrap();
        blend_weighted(&mut t, &[0, 2], InterpolationMethod::Lerp, &[0.5, 0.25], Some(&n)).unwrap();
        let rows = rows_of(&t);
        assert!(close(&rows[0], &[0.5, 0.0]));
        assert!(close(&rows[2], &[1.5, 1.5]));
    }

    #[test]
    fn neutral_batch_of_one_is_shared() {
        let mut t = Tensor::new(
            &[[[1.0_f32, 0.0], [0.0, 1.0]], [[4.0, 4.0], [8.0, 8.0]]],
            &Device::Cpu,
        )
        .unwrap();
        let n = Tensor::new(&[[[9.0_f32, 9.0]]], &Device::Cpu).unwrap();
        blend_uniform(&mut t, &[1], InterpolationMethod::Lerp, 1.0, Some(&n)).unwrap();
        let all: Vec<Vec<Vec<f32>>> = t.to_vec3().unwrap();
        assert_eq!(all[0][1], vec![9.0, 9.0]);
        assert_eq!(all[1][1], vec![9.0, 9.0]);
        assert_eq!(all[1][0], vec![4.0, 4.0]);
    }

    #[test]
    fn dtype_and_shape_are_preserved() {
        let mut t = cond().to_dtype(DType::F16).unwrap();
        blend_uniform(&mut t, &[0, 1], InterpolationMethod::Slerp, 0.5, None).unwrap();
        assert_eq!(t.dtype(), DType::F16);
        assert_eq!(t.dims(), &[1, 3, 2]);
    }

    #[test]
    fn errors_on_bad_input() {
        let mut t = cond();
        assert!(blend_uniform(&mut t, &[3], InterpolationMethod::Lerp, 0.5, None).is_err());
        assert!(blend_weighted(&mut t, &[0, 1], InterpolationMethod::Lerp, &[0.5], None).is_err());
        let wrong = Tensor::new(&[[[1.0_f32, 1.0, 1.0]]], &Device::Cpu).unwrap();
        assert!(blend_uniform(&mut t, &[0], InterpolationMethod::Lerp, 0.5, Some(&wrong)).is_err());
        let mut flat = Tensor::new(&[1.0_f32, 2.0], &Device::Cpu).unwrap();
        assert!(blend_uniform(&mut flat, &[0], InterpolationMethod::Lerp, 0.5, None).is_err());
        // untouched after a failed call
        assert_eq!(rows_of(&t), rows_of(&cond()));
    }

    #[test]
    fn empty_rows_is_noop() {
        let mut t = cond();
        blend_uniform(&mut t, &[], InterpolationMethod::Slerp, 1.0, None).unwrap();
        assert_eq!(rows_of(&t), rows_of(&cond()));
    }
}
