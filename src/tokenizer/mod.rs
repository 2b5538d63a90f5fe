// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tokenizer seam: the [`TokenEncoder`] trait the aligner depends on, and
//! [`PromptTokenizer`], its `HuggingFace` `tokenizers` implementation.
//!
//! Row classification only ever needs raw ids for short strings (single
//! words, separators, whole prompts), so the trait is a single method.
//! Hosts with their own tokenizer implement the trait directly.

use crate::error::{CutoffError, Result};

/// Encode text into token ids without special tokens.
///
/// Implementations must accept short substrings (a single word, `" and"`,
/// `","`) as well as full prompts, and must not add BOS/EOS markers: the
/// aligner compares the ids as contiguous sub-sequences of the prompt.
pub trait TokenEncoder {
    /// Encode `text` into token ids, without special tokens.
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Tokenizer`] if encoding fails.
    fn encode_raw(&self, text: &str) -> Result<Vec<u32>>;
}

/// `HuggingFace` tokenizer wrapper.
///
/// # Example
///
/// ```no_run
/// use candle_cutoff::{PromptTokenizer, TokenEncoder};
///
/// # fn main() -> candle_cutoff::Result<()> {
/// let tok = PromptTokenizer::from_hf_path("tokenizer.json")?;
/// let ids = tok.encode_raw("blue hair, red dress")?;
/// let text = tok.decode(&ids)?;
/// assert!(!ids.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct PromptTokenizer {
    /// The wrapped tokenizer.
    inner: Box<tokenizers::Tokenizer>,
}

impl PromptTokenizer {
    /// Load a `HuggingFace` tokenizer from a `tokenizer.json` file.
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Tokenizer`] if the file cannot be loaded or parsed.
    pub fn from_hf_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let tok = tokenizers::Tokenizer::from_file(path.as_ref()).map_err(|e| {
            CutoffError::Tokenizer(format!(
                "failed to load HF tokenizer from {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self::from_hf(tok))
    }

    /// Wrap an already-loaded `HuggingFace` tokenizer.
    #[must_use]
    pub fn from_hf(tokenizer: tokenizers::Tokenizer) -> Self {
        Self {
            inner: Box::new(tokenizer),
        }
    }

    /// Encode text into token ids, adding special tokens (e.g. BOS/EOS).
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Tokenizer`] if encoding fails.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        self.encode_with(text, true)
    }

    /// Decode token ids back to a string.
    ///
    /// # Errors
    ///
    /// Returns [`CutoffError::Tokenizer`] if decoding fails.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| CutoffError::Tokenizer(format!("HF decode failed: {e}")))
    }

    /// Vocabulary size, including added tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn encode_with(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| CutoffError::Tokenizer(format!("HF encode failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl TokenEncoder for PromptTokenizer {
    fn encode_raw(&self, text: &str) -> Result<Vec<u32>> {
        self.encode_with(text, false)
    }
}

impl std::fmt::Debug for PromptTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptTokenizer")
            .field("vocab_size", &self.vocab_size())
            .finish_non_exhaustive()
    }
}
