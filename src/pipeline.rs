// SPDX-License-Identifier: MIT OR Apache-2.0

//! The [`Cutoff`] coordinator: the two hook entry points.
//!
//! A host calls [`Cutoff::observe`] right after each text encoder has
//! encoded the prompt, and [`Cutoff::blend`] on the final conditioning
//! tensor before it reaches the denoiser.  `observe` classifies token
//! rows and stores them per encoder; `blend` reads them back and pulls the
//! victim rows toward the neutral conditioning.
//!
//! Both entry points are fail-open: they never return an error.  Anything
//! unexpected resets the captured state or skips the blend, and the
//! conditioning is then left exactly as the host produced it.

use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::Tensor;
use serde::Serialize;

use crate::align::{classify_rows, RowFilters};
use crate::backend::{EncoderPair, TextEncoder};
use crate::cache::{SessionState, SessionStore};
use crate::config::{CutoffConfig, InterpolationMethod, TeAwareMode, MAX_CUT_RATIO};
use crate::error::{CutoffError, Result};
use crate::hooks::{EncoderTag, ReentrancyGuard};
use crate::neutralize::{blend_rows, decay_weights, BlendWeights, NeutralProvider};
use crate::util::dummy::build_dummy_text;
use crate::util::words::{canonical_targets, parse_word_list};

/// Routine diagnostics: `info` when the user asked for verbose logs,
/// `debug` otherwise.
macro_rules! diag {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why [`Cutoff::blend`] left the conditioning untouched.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The master switch is off.
    Disabled,
    /// The tensor is not `[batch, seq, hidden]`.
    NotConditioning,
    /// Blending is switched off for this encoder.
    EncoderNotApplied,
    /// The target option changed since the rows were captured.
    StaleTargets,
    /// The captured sequence length differs from the conditioning's.
    SequenceMismatch,
    /// Nothing to neutralize.
    NoVictimRows,
    /// Called from inside another blend on the same thread.
    Reentrant,
    /// Cross-encoder gating vetoed the blend.
    TeAwareGate,
}

/// Where the neutral rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NeutralSource {
    /// Re-encoded dummy prompt.
    Dummy,
    /// Per-batch mean of the conditioning itself.
    Mean,
}

/// Summary of an applied blend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlendReport {
    /// Encoder the conditioning was attributed to.
    pub tag: EncoderTag,
    /// Sequence length of the conditioning.
    pub seq_len: usize,
    /// Rows that were blended, ascending.
    pub rows: Vec<usize>,
    /// Interpolation used.
    pub method: InterpolationMethod,
    /// Neutral source used.
    pub neutral: NeutralSource,
    /// Whether per-row distance decay was applied.
    pub decayed: bool,
}

/// Result of [`Cutoff::blend`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum BlendOutcome {
    /// Victim rows were rewritten.
    Applied(BlendReport),
    /// Nothing was done.
    Skipped(SkipReason),
    /// A tensor operation failed; the conditioning is unchanged.
    Failed(String),
}

impl BlendOutcome {
    /// Whether the conditioning was modified.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

// ---------------------------------------------------------------------------
// Cutoff
// ---------------------------------------------------------------------------

/// Hook coordinator owning the per-encoder session store.
///
/// # Example
///
/// ```
/// use candle_cutoff::{BlendOutcome, Cutoff, CutoffConfig, SkipReason};
/// # use candle_cutoff::{EncoderPair, TextEncoder, TokenEncoder, Result};
/// # use candle_core::{DType, Device, Tensor};
/// # struct Null;
/// # impl TokenEncoder for Null {
/// #     fn encode_raw(&self, _: &str) -> Result<Vec<u32>> { Ok(Vec::new()) }
/// # }
/// # impl TextEncoder for Null {
/// #     fn encode(&self, t: &[&str]) -> Result<Tensor> {
/// #         Ok(Tensor::zeros((t.len(), 4, 2), DType::F32, &Device::Cpu)?)
/// #     }
/// #     fn tokenizer(&self) -> &dyn TokenEncoder { self }
/// # }
/// let cutoff = Cutoff::new();
/// let encoders = EncoderPair::single(Box::new(Null));
/// let mut cond = Tensor::zeros((1, 4, 2), DType::F32, &Device::Cpu).unwrap();
///
/// // Disabled by default: the conditioning is left alone.
/// let outcome = cutoff.blend(&mut cond, &CutoffConfig::default(), &encoders);
/// assert_eq!(outcome, BlendOutcome::Skipped(SkipReason::Disabled));
/// ```
///
/// # Requests
///
/// Captures are grouped into requests: the captures made for one
/// conditioning build, followed by its blend.  The first capture after a
/// blend opens a new request, as does a capture whose targets differ from
/// another encoder's capture in the current request.  Hosts may also open
/// one explicitly with [`begin_request`](Self::begin_request).  Cross-encoder gating only
/// looks at captures of the current request.
#[derive(Debug, Default)]
pub struct Cutoff {
    store: SessionStore,
    request: u64,
    /// Set by every blend; the next capture then opens a new request.
    blended: AtomicBool,
}

impl Cutoff {
    /// A coordinator with an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The captured per-encoder state.
    #[must_use]
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Mutable access to the store (e.g. to reset between jobs).
    pub fn store_mut(&mut self) -> &mut SessionStore {
        &mut self.store
    }

    /// Open a new request: captures made before it no longer take part in
    /// cross-encoder gating.
    pub fn begin_request(&mut self) {
        self.request = self.request.wrapping_add(1);
        *self.blended.get_mut() = false;
    }

    /// Identifier of the current request.
    #[must_use]
    pub const fn request(&self) -> u64 {
        self.request
    }

    /// Capture hook: classify the rows of `text` as `engine` tokenizes it.
    ///
    /// `encoded` is the tensor `engine` just produced for `text`; its
    /// sequence length attributes the call to an encoder.  The state for
    /// that encoder is overwritten, or reset when there are no targets,
    /// the text is empty, or tokenization fails.
    pub fn observe(
        &mut self,
        engine: &dyn TextEncoder,
        text: &str,
        encoded: &Tensor,
        config: &CutoffConfig,
    ) -> &SessionState {
        let tag = tag_of(encoded);
        let canon = canonical_targets(&config.targets);
        if std::mem::take(self.blended.get_mut()) || self.targets_changed(tag, &canon) {
            self.begin_request();
        }

        let mut state = if canon.is_empty() || text.is_empty() {
            SessionState::cleared(canon)
        } else {
            match capture(engine, text, config) {
                Ok(state) => {
                    diag!(
                        config.debug_log,
                        %tag,
                        seq_len = state.seq_len,
                        hits = state.hits,
                        source_rows = state.source.len(),
                        victim_rows = state.victim.len(),
                        targets = %state.targets_canon,
                        "rows captured"
                    );
                    state
                }
                Err(e) => {
                    tracing::warn!(%tag, "tokenize failed, state reset: {e}");
                    SessionState::cleared(canon)
                }
            }
        };

        state.request = self.request;
        self.store.set(tag, state);
        self.store.get(tag)
    }

    /// Blend hook: neutralize the victim rows of `cond` in place.
    ///
    /// The encoder is inferred from the sequence length of `cond`.  Any
    /// precondition that does not hold (see [`SkipReason`]) leaves `cond`
    /// untouched.  With sanity mode on, the trailing `cut_ratio` percent of
    /// rows are blended toward the mean instead, ignoring the captured
    /// rows.
    ///
    /// # Shapes
    /// - `cond`: `[batch, seq, hidden]`, same shape and dtype afterwards
    pub fn blend(
        &self,
        cond: &mut Tensor,
        config: &CutoffConfig,
        encoders: &EncoderPair,
    ) -> BlendOutcome {
        self.blended.store(true, Ordering::Relaxed);
        if !config.enabled {
            return BlendOutcome::Skipped(SkipReason::Disabled);
        }
        let verbose = config.debug_log;

        let (seq_len, hidden) = match *cond.dims() {
            [_, s, h] => (s, h),
            _ => {
                diag!(verbose, dims = ?cond.dims(), "conditioning is not 3D; skip");
                return BlendOutcome::Skipped(SkipReason::NotConditioning);
            }
        };
        let tag = EncoderTag::from_seq_len(seq_len);
        if !config.applies_to(tag) {
            return BlendOutcome::Skipped(SkipReason::EncoderNotApplied);
        }

        let canon = canonical_targets(&config.targets);
        let state = self.store.get(tag);
        if state.targets_canon != canon {
            diag!(
                verbose,
                %tag,
                captured = %state.targets_canon,
                current = %canon,
                "targets changed since capture; skip"
            );
            return BlendOutcome::Skipped(SkipReason::StaleTargets);
        }

        let rows = if config.sanity {
            select_tail_rows(seq_len, config.cut_ratio)
        } else {
            if config.teaware_mode == TeAwareMode::SafeAnd && !self.all_encoders_agree(&canon) {
                diag!(verbose, %tag, "encoders disagree; skip");
                return BlendOutcome::Skipped(SkipReason::TeAwareGate);
            }
            if !state.victim.is_empty() && state.seq_len != seq_len {
                diag!(
                    verbose,
                    %tag,
                    "captured length {} != conditioning length {seq_len}; skip",
                    state.seq_len
                );
                return BlendOutcome::Skipped(SkipReason::SequenceMismatch);
            }
            state.victim.clone()
        };
        if rows.is_empty() {
            diag!(verbose, %tag, seq_len, targets = %canon, "no victim rows");
            return BlendOutcome::Skipped(SkipReason::NoVictimRows);
        }

        let Some(_guard) = ReentrancyGuard::enter() else {
            diag!(verbose, %tag, "re-entrant blend; skip");
            return BlendOutcome::Skipped(SkipReason::Reentrant);
        };

        let neutral = if config.sanity {
            None
        } else {
            NeutralProvider::new(encoders)
                .encode(&state.dummy_text, tag, hidden, seq_len)
                .and_then(|full| match select_rows(&full, &rows) {
                    Ok(sel) => Some(sel),
                    Err(e) => {
                        tracing::warn!(%tag, "neutral row selection failed: {e}");
                        None
                    }
                })
        };

        let weights = if config.sanity {
            BlendWeights::Uniform(config.strength)
        } else {
            decay_weights(
                &rows,
                &state.source,
                config.decay_mode,
                config.decay_strength,
                config.strength,
            )
        };

        if let Err(e) = blend_rows(cond, &rows, config.method, &weights, neutral.as_ref()) {
            tracing::warn!(%tag, "blend failed, conditioning unchanged: {e}");
            return BlendOutcome::Failed(e.to_string());
        }

        let report = BlendReport {
            tag,
            seq_len,
            decayed: matches!(weights, BlendWeights::PerRow(_)),
            neutral: if neutral.is_some() {
                NeutralSource::Dummy
            } else {
                NeutralSource::Mean
            },
            method: config.method,
            rows,
        };
        diag!(
            verbose,
            %tag,
            seq_len,
            victim_rows = report.rows.len(),
            first = report.rows.first().copied().unwrap_or(0),
            last = report.rows.last().copied().unwrap_or(0),
            method = %config.method,
            alpha = config.strength,
            neutral = ?report.neutral,
            targets = %canon,
            "victim rows blended"
        );
        BlendOutcome::Applied(report)
    }

    /// Another encoder of the current request was captured for different
    /// targets, so this capture belongs to a new request.
    fn targets_changed(&self, tag: EncoderTag, canon: &str) -> bool {
        self.store.tags().into_iter().filter(|&t| t != tag).any(|t| {
            let s = self.store.get(t);
            s.request == self.request && s.targets_canon != canon
        })
    }

    /// Every encoder captured in the current request was captured for
    /// `canon` and has rows to neutralize.
    fn all_encoders_agree(&self, canon: &str) -> bool {
        let current: Vec<&SessionState> = self
            .store
            .tags()
            .into_iter()
            .map(|t| self.store.get(t))
            .filter(|s| s.request == self.request)
            .collect();
        !current.is_empty()
            && current
                .iter()
                .all(|s| s.targets_canon == canon && !s.victim.is_empty())
    }
}

/// Classify rows and build the dummy prompt for one encoder call.
fn capture(engine: &dyn TextEncoder, text: &str, config: &CutoffConfig) -> Result<SessionState> {
    let ids = engine.tokenize_line(text)?.flatten();
    let targets = parse_word_list(&config.targets);
    let filters = RowFilters {
        targets: targets.clone(),
        expand_n: config.source_expand_n,
        processing_targets: parse_word_list(&config.processing_targets),
        exclude: parse_word_list(&config.exclude_tokens),
    };
    let rows = classify_rows(engine.tokenizer(), &ids, &filters);
    Ok(SessionState {
        source: rows.source,
        victim: rows.victim,
        targets_canon: targets.join(","),
        dummy_text: build_dummy_text(text, &targets),
        seq_len: rows.seq_len,
        hits: rows.hits,
        request: 0,
    })
}

/// Encoder attribution from the sequence axis of an encoder output;
/// outputs without one count as primary.
fn tag_of(encoded: &Tensor) -> EncoderTag {
    let dims = encoded.dims();
    dims.len()
        .checked_sub(2)
        .and_then(|axis| dims.get(axis))
        .map_or(EncoderTag::Primary, |&s| EncoderTag::from_seq_len(s))
}

/// `neutral[:, rows, :]`.
fn select_rows(neutral: &Tensor, rows: &[usize]) -> Result<Tensor> {
    let idx = rows
        .iter()
        .map(|&r| u32::try_from(r))
        .collect::<std::result::Result<Vec<u32>, _>>()
        .map_err(|e| CutoffError::Shape(format!("row index overflow: {e}")))?;
    let idx = Tensor::new(idx, neutral.device())?;
    Ok(neutral.index_select(&idx, 1)?)
}

/// The trailing `floor(seq_len * ratio / 100)` rows, ratio clamped to
/// `[0, 50]`.
///
/// ```
/// use candle_cutoff::pipeline::select_tail_rows;
///
/// assert_eq!(select_tail_rows(10, 30), vec![7, 8, 9]);
/// assert_eq!(select_tail_rows(10, 90), vec![5, 6, 7, 8, 9]);
/// assert!(select_tail_rows(3, 10).is_empty());
/// ```
#[must_use]
pub fn select_tail_rows(seq_len: usize, ratio: u32) -> Vec<usize> {
    let ratio = usize::try_from(ratio.min(MAX_CUT_RATIO)).unwrap_or(0);
    let k = seq_len.saturating_mul(ratio) / 100;
    (seq_len - k..seq_len).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;
    use crate::tokenizer::TokenEncoder;

    /// Vocabulary-free encoder: every whitespace word is one token whose
    /// id is its first byte, and every row of the output is `[1, 0]`.
    struct Bytes;

    impl TokenEncoder for Bytes {
        fn encode_raw(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text
                .split_whitespace()
                .filter_map(|w| w.bytes().next())
                .map(u32::from)
                .collect())
        }
    }

    impl TextEncoder for Bytes {
        fn encode(&self, texts: &[&str]) -> Result<Tensor> {
            let seq = texts.first().map_or(0, |t| self.encode_raw(t).map_or(0, |v| v.len()));
            let ones = Tensor::ones((texts.len(), seq, 1), DType::F32, &Device::Cpu)?;
            let zeros = Tensor::zeros((texts.len(), seq, 1), DType::F32, &Device::Cpu)?;
            Ok(Tensor::cat(&[ones, zeros], 2)?)
        }

        fn tokenizer(&self) -> &dyn TokenEncoder {
            self
        }
    }

    fn enabled(targets: &str) -> CutoffConfig {
        CutoffConfig {
            enabled: true,
            targets: targets.into(),
            apply_te1: true,
            source_expand_n: 0,
            ..CutoffConfig::default()
        }
    }

    #[test]
    fn tail_rows_follow_ratio() {
        assert_eq!(select_tail_rows(77, 50), (39..77).collect::<Vec<_>>());
        assert_eq!(select_tail_rows(20, 50), (10..20).collect::<Vec<_>>());
        assert!(select_tail_rows(77, 0).is_empty());
        assert!(select_tail_rows(0, 50).is_empty());
    }

    #[test]
    fn observe_without_targets_resets() {
        let mut cutoff = Cutoff::new();
        let enc = Bytes.encode(&["a b"]).unwrap();
        let state = cutoff.observe(&Bytes, "a b", &enc, &enabled(""));
        assert!(state.is_empty());
        assert_eq!(cutoff.store().last_tag(), Some(EncoderTag::Primary));
    }

    #[test]
    fn observe_captures_rows_and_dummy() {
        let mut cutoff = Cutoff::new();
        let text = "x y blue z w";
        let enc = Bytes.encode(&[text]).unwrap();
        let state = cutoff.observe(&Bytes, text, &enc, &enabled("Blue")).clone();
        assert_eq!(state.source, vec![1, 2, 3]);
        assert_eq!(state.victim, vec![0, 4]);
        assert_eq!(state.targets_canon, "blue");
        assert_eq!(state.dummy_text, "x y _ z w");
        assert_eq!(state.seq_len, 5);
    }

    #[test]
    fn blend_skips_stale_targets() {
        let mut cutoff = Cutoff::new();
        let text = "x y blue z w";
        let mut cond = Bytes.encode(&[text]).unwrap();
        cutoff.observe(&Bytes, text, &cond, &enabled("blue"));
        let pair = EncoderPair::single(Box::new(Bytes));
        let outcome = cutoff.blend(&mut cond, &enabled("red"), &pair);
        assert_eq!(outcome, BlendOutcome::Skipped(SkipReason::StaleTargets));
    }

    #[test]
    fn blend_respects_encoder_flags() {
        let cutoff = Cutoff::new();
        let mut cond = Bytes.encode(&["a b"]).unwrap();
        let pair = EncoderPair::single(Box::new(Bytes));
        let mut config = enabled("");
        config.apply_te1 = false;
        let outcome = cutoff.blend(&mut cond, &config, &pair);
        assert_eq!(outcome, BlendOutcome::Skipped(SkipReason::EncoderNotApplied));
    }

    #[test]
    fn blend_rejects_non_3d() {
        let cutoff = Cutoff::new();
        let mut flat = Tensor::zeros((4, 2), DType::F32, &Device::Cpu).unwrap();
        let pair = EncoderPair::single(Box::new(Bytes));
        let outcome = cutoff.blend(&mut flat, &enabled(""), &pair);
        assert_eq!(outcome, BlendOutcome::Skipped(SkipReason::NotConditioning));
    }

    #[test]
    fn reentrant_blend_is_skipped() {
        let mut cutoff = Cutoff::new();
        let text = "x y blue z w";
        let mut cond = Bytes.encode(&[text]).unwrap();
        cutoff.observe(&Bytes, text, &cond, &enabled("blue"));
        let pair = EncoderPair::single(Box::new(Bytes));
        let _outer = ReentrancyGuard::enter().unwrap();
        let outcome = cutoff.blend(&mut cond, &enabled("blue"), &pair);
        assert_eq!(outcome, BlendOutcome::Skipped(SkipReason::Reentrant));
    }

    #[test]
    fn sanity_mode_blends_tail_toward_mean() {
        let cutoff = Cutoff::new();
        let mut cond = Tensor::new(
            &[[[0.0_f32, 0.0], [0.0, 0.0], [4.0, 4.0], [4.0, 4.0]]],
            &Device::Cpu,
        )
        .unwrap();
        let pair = EncoderPair::single(Box::new(Bytes));
        let mut config = enabled("");
        config.sanity = true;
        config.method = InterpolationMethod::Lerp;
        config.strength = 1.0;
        config.cut_ratio = 50;
        let outcome = cutoff.blend(&mut cond, &config, &pair);
        let BlendOutcome::Applied(report) = outcome else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(report.rows, vec![2, 3]);
        assert_eq!(report.neutral, NeutralSource::Mean);
        let rows: Vec<Vec<f32>> = cond.get(0).unwrap().to_vec2().unwrap();
        assert_eq!(rows[0], vec![0.0, 0.0]);
        assert_eq!(rows[2], vec![2.0, 2.0]);
        assert_eq!(rows[3], vec![2.0, 2.0]);
    }
}
