// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host text-encoder interface.
//!
//! [`TextEncoder`] is the trait the host's prompt encoders implement.
//! [`EncoderPair`] bundles the primary encoder with the optional secondary
//! one (dual-encoder pipelines) and is what the neutral vector provider
//! re-encodes dummy prompts through.

use candle_core::Tensor;

use crate::error::Result;
use crate::tokenizer::TokenEncoder;

// ---------------------------------------------------------------------------
// TokenizedLine
// ---------------------------------------------------------------------------

/// Token ids of one prompt line, as the host splits it into chunks.
///
/// Hosts that encode long prompts in fixed-size windows return one chunk
/// per window; the row indices used everywhere else refer to the
/// concatenation of all chunks ([`flatten`](Self::flatten)).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizedLine {
    /// Token id chunks, in prompt order.
    pub chunks: Vec<Vec<u32>>,
}

impl TokenizedLine {
    /// Wrap chunks produced by the host.
    #[must_use]
    pub const fn new(chunks: Vec<Vec<u32>>) -> Self {
        Self { chunks }
    }

    /// A line made of a single chunk.
    #[must_use]
    pub fn single(ids: Vec<u32>) -> Self {
        Self { chunks: vec![ids] }
    }

    /// All chunks concatenated.
    #[must_use]
    pub fn flatten(&self) -> Vec<u32> {
        self.chunks.iter().flatten().copied().collect()
    }

    /// Total number of tokens across chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Whether the line holds no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// TextEncoder trait
// ---------------------------------------------------------------------------

/// A prompt encoder owned by the host pipeline.
///
/// Only three capabilities are needed: encode a batch of prompts to a
/// conditioning tensor, split a prompt into token ids the same way the
/// encoder does internally, and expose a tokenizer for encoding isolated
/// words.
pub trait TextEncoder: Send + Sync {
    /// Encode `texts` to conditioning.
    ///
    /// # Shapes
    /// - returns: `[batch, seq, hidden]` with `batch == texts.len()`
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Encoder`](crate::CutoffError::Encoder) or
    /// [`CutoffError::Model`](crate::CutoffError::Model) on failure.
    fn encode(&self, texts: &[&str]) -> Result<Tensor>;

    /// The tokenizer used for word surface forms.
    fn tokenizer(&self) -> &dyn TokenEncoder;

    /// Tokenize one prompt line exactly as [`encode`](Self::encode) sees it.
    ///
    /// The flattened ids must line up with the sequence axis of the
    /// encoded tensor.  The default treats the whole line as one chunk of
    /// [`encode_raw`](TokenEncoder::encode_raw) ids, which only holds for
    /// encoders whose output has one row per raw id.  Encoders that add
    /// BOS/EOS tokens, pad, or split into chunks must override it;
    /// otherwise every captured row index is shifted and the capture is
    /// dropped on the sequence-length check.
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Tokenizer`](crate::CutoffError::Tokenizer) on
    /// failure.
    fn tokenize_line(&self, text: &str) -> Result<TokenizedLine> {
        Ok(TokenizedLine::single(self.tokenizer().encode_raw(text)?))
    }
}

// ---------------------------------------------------------------------------
// EncoderPair
// ---------------------------------------------------------------------------

/// The host's text encoders: a primary one and, for dual-encoder models,
/// a secondary one whose output is concatenated on the hidden axis.
pub struct EncoderPair {
    // TRAIT_OBJECT: host encoders are heterogeneous
    primary: Box<dyn TextEncoder>,
    secondary: Option<Box<dyn TextEncoder>>,
}

impl EncoderPair {
    /// A single-encoder pipeline.
    #[must_use]
    pub fn single(primary: Box<dyn TextEncoder>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// A dual-encoder pipeline.
    #[must_use]
    pub fn dual(primary: Box<dyn TextEncoder>, secondary: Box<dyn TextEncoder>) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
        }
    }

    /// The primary encoder.
    #[must_use]
    pub fn primary(&self) -> &dyn TextEncoder {
        self.primary.as_ref()
    }

    /// The secondary encoder, if any.
    #[must_use]
    pub fn secondary(&self) -> Option<&dyn TextEncoder> {
        self.secondary.as_deref()
    }

    /// Whether a secondary encoder is present.
    #[must_use]
    pub const fn is_dual(&self) -> bool {
        self.secondary.is_some()
    }
}

impl std::fmt::Debug for EncoderPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderPair")
            .field("dual", &self.is_dual())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn tokenized_line_flattens_in_order() {
        let line = TokenizedLine::new(vec![vec![1, 2], vec![], vec![3]]);
        assert_eq!(line.flatten(), vec![1, 2, 3]);
        assert_eq!(line.len(), 3);
        assert!(!line.is_empty());
        assert!(TokenizedLine::default().is_empty());
    }
}
