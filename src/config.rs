// SPDX-License-Identifier: MIT OR Apache-2.0

//! Neutralization configuration and JSON option parsing.
//!
//! [`CutoffConfig`] is the typed form of the host's option store.  It is
//! read on every call (no caching), so hosts typically rebuild it from
//! their settings right before invoking [`Cutoff::observe`] or
//! [`Cutoff::blend`].
//!
//! # Usage
//!
//! ```
//! use candle_cutoff::{CutoffConfig, InterpolationMethod};
//!
//! let json: serde_json::Value = serde_json::json!({
//!     "enable": true,
//!     "targets": "blue, red",
//!     "strength": 1.7,
//!     "method": "Lerp",
//!     "cutoff_forge_source_expand_n": 9,
//! });
//! let config = CutoffConfig::from_json(&json).unwrap();
//! assert!(config.enabled);
//! assert_eq!(config.method, InterpolationMethod::Lerp);
//! assert!((config.strength - 1.0).abs() < f32::EPSILON); // clamped
//! assert_eq!(config.source_expand_n, 5); // clamped
//! ```
//!
//! [`Cutoff::observe`]: crate::Cutoff::observe
//! [`Cutoff::blend`]: crate::Cutoff::blend

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CutoffError, Result};
use crate::hooks::EncoderTag;

/// Prefix used by the host's option store for every key.
const HOST_KEY_PREFIX: &str = "cutoff_forge_";

/// Largest neighbor expansion distance accepted.
pub const MAX_SOURCE_EXPAND: usize = 5;

/// Largest tail ratio (percent) accepted by the sanity test.
pub const MAX_CUT_RATIO: u32 = 50;

// ---------------------------------------------------------------------------
// Configuration enums
// ---------------------------------------------------------------------------

/// Interpolation used to move a victim row toward its neutral vector.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum InterpolationMethod {
    /// Straight-line interpolation: `(1 - a) * o + a * n`.
    Lerp,
    /// Spherical interpolation on the unit sphere, rescaled by `|o|`.
    #[default]
    Slerp,
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lerp => write!(f, "Lerp"),
            Self::Slerp => write!(f, "Slerp"),
        }
    }
}

impl FromStr for InterpolationMethod {
    type Err = CutoffError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lerp" => Ok(Self::Lerp),
            "slerp" => Ok(Self::Slerp),
            other => Err(CutoffError::Config(format!(
                "unknown interpolation method: '{other}'"
            ))),
        }
    }
}

/// Falloff applied to the blend weight as a victim row moves away from
/// the nearest source row.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DecayMode {
    /// Uniform weight for every victim row.
    #[default]
    Off,
    /// `1 - t`.
    Linear,
    /// `0.5 * (1 + cos(pi * t))`.
    Cosine,
}

impl fmt::Display for DecayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Linear => write!(f, "linear"),
            Self::Cosine => write!(f, "cosine"),
        }
    }
}

impl FromStr for DecayMode {
    type Err = CutoffError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Ok(Self::Off),
            "linear" => Ok(Self::Linear),
            "cosine" | "cos" => Ok(Self::Cosine),
            other => Err(CutoffError::Config(format!("unknown decay mode: '{other}'"))),
        }
    }
}

/// How captures from the two text encoders gate each other.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TeAwareMode {
    /// Each encoder is blended on its own capture.
    #[default]
    Off,
    /// Blend only when every captured encoder agrees on the targets and has
    /// something to neutralize.
    SafeAnd,
}

impl fmt::Display for TeAwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::SafeAnd => write!(f, "safe_and"),
        }
    }
}

impl FromStr for TeAwareMode {
    type Err = CutoffError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Ok(Self::Off),
            "safe_and" | "safe-and" => Ok(Self::SafeAnd),
            other => Err(CutoffError::Config(format!(
                "unknown TE-aware mode: '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// CutoffConfig
// ---------------------------------------------------------------------------

/// Every option that steers row classification and blending.
///
/// `Default` yields the host's startup defaults: disabled, Slerp at 0.5,
/// secondary encoder only, expansion distance 1, no decay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(clippy::struct_excessive_bools)] // mirrors the host's checkbox options
pub struct CutoffConfig {
    /// Master switch.
    pub enabled: bool,
    /// Target words (comma/whitespace separated).
    pub targets: String,
    /// Blend strength `alpha` in `[0, 1]`.
    pub strength: f32,
    /// Interpolation method.
    pub method: InterpolationMethod,
    /// Blend conditioning produced by the primary encoder.
    pub apply_te1: bool,
    /// Blend conditioning produced by the secondary encoder.
    pub apply_te2: bool,
    /// Neighbor expansion distance around each target match, in `[0, 5]`.
    pub source_expand_n: usize,
    /// Distance decay falloff.
    pub decay_mode: DecayMode,
    /// Decay strength in `[0, 1]`.
    pub decay_strength: f32,
    /// Words whose rows are never neutralized.
    pub exclude_tokens: String,
    /// When non-empty, only rows of these words are neutralized.
    pub processing_targets: String,
    /// Cross-encoder gating.
    pub teaware_mode: TeAwareMode,
    /// Promote diagnostics from `debug` to `info`.
    pub debug_log: bool,
    /// Replace the victim rows with the trailing `cut_ratio` percent.
    pub sanity: bool,
    /// Tail ratio for the sanity test, in `[0, 50]`.
    pub cut_ratio: u32,
}

impl Default for CutoffConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            targets: String::new(),
            strength: 0.5,
            method: InterpolationMethod::Slerp,
            apply_te1: false,
            apply_te2: true,
            source_expand_n: 1,
            decay_mode: DecayMode::Off,
            decay_strength: 0.5,
            exclude_tokens: String::new(),
            processing_targets: String::new(),
            teaware_mode: TeAwareMode::Off,
            debug_log: false,
            sanity: false,
            cut_ratio: MAX_CUT_RATIO,
        }
    }
}

impl CutoffConfig {
    /// Parse a configuration from a JSON object.
    ///
    /// Each key may be given bare (`"strength"`) or with the host's
    /// `cutoff_forge_` prefix (`"cutoff_forge_strength"`); the bare key wins
    /// when both are present.  Missing keys keep their default.  Numeric
    /// fields are clamped to their valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Config`] if the value is not an object, a
    /// field has the wrong JSON type, or an enum field holds an unknown
    /// string.
    pub fn from_json(config: &Value) -> Result<Self> {
        if !config.is_object() {
            return Err(CutoffError::Config(
                "configuration must be a JSON object".into(),
            ));
        }

        let defaults = Self::default();
        let parsed = Self {
            enabled: get_bool_or(config, "enable", defaults.enabled)?,
            targets: get_string_or(config, "targets", &defaults.targets)?,
            strength: get_f32_or(config, "strength", defaults.strength)?,
            method: get_enum_or(config, "method", defaults.method)?,
            apply_te1: get_bool_or(config, "apply_te1", defaults.apply_te1)?,
            apply_te2: get_bool_or(config, "apply_te2", defaults.apply_te2)?,
            source_expand_n: get_usize_or(config, "source_expand_n", defaults.source_expand_n)?,
            decay_mode: get_enum_or(config, "decay_mode", defaults.decay_mode)?,
            decay_strength: get_f32_or(config, "decay_strength", defaults.decay_strength)?,
            exclude_tokens: get_string_or(config, "exclude_tokens", &defaults.exclude_tokens)?,
            processing_targets: get_string_or(
                config,
                "processing_targets",
                &defaults.processing_targets,
            )?,
            teaware_mode: get_enum_or(config, "teaware_mode", defaults.teaware_mode)?,
            debug_log: get_bool_or(config, "debug_log", defaults.debug_log)?,
            sanity: get_bool_or(config, "sanity", defaults.sanity)?,
            cut_ratio: get_u32_or(config, "cut_ratio", defaults.cut_ratio)?,
        };

        Ok(parsed.clamped())
    }

    /// Parse a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Json`] on malformed JSON, otherwise see
    /// [`from_json`](Self::from_json).
    pub fn from_json_str(s: &str) -> Result<Self> {
        let json: Value = serde_json::from_str(s)?;
        Self::from_json(&json)
    }

    /// Read and parse a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Io`] if the file cannot be read, otherwise see
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Clamp every numeric field to its valid range.
    ///
    /// Non-finite floats fall back to the default value.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        let defaults = Self::default();
        self.strength = clamp_unit(self.strength, defaults.strength);
        self.decay_strength = clamp_unit(self.decay_strength, defaults.decay_strength);
        self.source_expand_n = self.source_expand_n.min(MAX_SOURCE_EXPAND);
        self.cut_ratio = self.cut_ratio.min(MAX_CUT_RATIO);
        self
    }

    /// Whether conditioning from the given encoder should be blended.
    #[must_use]
    pub const fn applies_to(&self, tag: EncoderTag) -> bool {
        match tag {
            EncoderTag::Primary => self.apply_te1,
            EncoderTag::Secondary => self.apply_te2,
        }
    }

    /// Serialize the effective configuration (for diagnostics).
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Look a key up bare, then with the host prefix.
fn lookup<'a>(config: &'a Value, key: &str) -> Option<&'a Value> {
    config
        .get(key)
        .or_else(|| config.get(format!("{HOST_KEY_PREFIX}{key}")))
        .filter(|v| !v.is_null())
}

fn type_error(key: &str, expected: &str, got: &Value) -> CutoffError {
    CutoffError::Config(format!("'{key}' must be {expected}, got {got}"))
}

fn get_bool_or(config: &Value, key: &str, default: bool) -> Result<bool> {
    match lookup(config, key) {
        None => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| type_error(key, "a boolean", v)),
    }
}

fn get_string_or(config: &Value, key: &str, default: &str) -> Result<String> {
    match lookup(config, key) {
        None => Ok(default.to_owned()),
        Some(v) => v
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| type_error(key, "a string", v)),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn get_f32_or(config: &Value, key: &str, default: f32) -> Result<f32> {
    match lookup(config, key) {
        None => Ok(default),
        // CAST: f64 → f32, option values are small
        Some(v) => v
            .as_f64()
            .map(|x| x as f32)
            .ok_or_else(|| type_error(key, "a number", v)),
    }
}

/// Integer option; negative values clamp to zero, fractional values are
/// rounded (host sliders may emit `1.0`).
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
fn get_u64_or(config: &Value, key: &str, default: u64) -> Result<u64> {
    match lookup(config, key) {
        None => Ok(default),
        Some(v) => {
            if let Some(n) = v.as_u64() {
                Ok(n)
            } else if let Some(x) = v.as_f64() {
                // CAST: f64 → u64, clamped non-negative and finite
                Ok(if x.is_finite() { x.round().max(0.0) as u64 } else { default })
            } else {
                Err(type_error(key, "a non-negative integer", v))
            }
        }
    }
}

fn get_usize_or(config: &Value, key: &str, default: usize) -> Result<usize> {
    let default_u64 = u64::try_from(default).unwrap_or(u64::MAX);
    let n = get_u64_or(config, key, default_u64)?;
    Ok(usize::try_from(n).unwrap_or(usize::MAX))
}

fn get_u32_or(config: &Value, key: &str, default: u32) -> Result<u32> {
    let n = get_u64_or(config, key, u64::from(default))?;
    Ok(u32::try_from(n).unwrap_or(u32::MAX))
}

fn get_enum_or<T>(config: &Value, key: &str, default: T) -> Result<T>
where
    T: FromStr<Err = CutoffError>,
{
    match lookup(config, key) {
        None => Ok(default),
        Some(v) => v
            .as_str()
            .ok_or_else(|| type_error(key, "a string", v))?
            .parse(),
    }
}

fn clamp_unit(x: f32, fallback: f32) -> f32 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
