// SPDX-License-Identifier: MIT OR Apache-2.0

//! Neutral vector provider.
//!
//! Re-encodes the dummy prompt (targets blanked out) through the host's
//! own encoders so the neutral rows live in the same space as the
//! conditioning being blended.  For a dual-encoder pipeline the two
//! outputs are concatenated on the hidden axis, which is how such hosts
//! build their conditioning in the first place.

use candle_core::Tensor;

use crate::backend::{EncoderPair, TextEncoder};
use crate::error::{CutoffError, Result};
use crate::hooks::EncoderTag;

/// Encodes dummy prompts into neutral conditioning.
///
/// Nothing is cached: every call re-encodes.
#[derive(Debug, Clone, Copy)]
pub struct NeutralProvider<'a> {
    encoders: &'a EncoderPair,
}

impl<'a> NeutralProvider<'a> {
    /// Provider over the host's encoders.
    #[must_use]
    pub const fn new(encoders: &'a EncoderPair) -> Self {
        Self { encoders }
    }

    /// Neutral conditioning for `dummy_text`, shaped `[batch, expect_seq,
    /// expect_hidden]`, or `None` when no encoder output fits.
    ///
    /// Candidates are tried in order: both encoders concatenated on the
    /// hidden axis, then the primary alone, then the secondary alone.  The
    /// first whose hidden size equals `expect_hidden` is kept; it is then
    /// rejected if its sequence length differs from `expect_seq`.  An empty
    /// dummy text or an encoder failure also yields `None` (failures are
    /// logged), and callers fall back to the mean vector.
    ///
    /// # Shapes
    /// - returns: `[batch, expect_seq, expect_hidden]`
    #[must_use]
    pub fn encode(
        &self,
        dummy_text: &str,
        tag: EncoderTag,
        expect_hidden: usize,
        expect_seq: usize,
    ) -> Option<Tensor> {
        if dummy_text.is_empty() {
            return None;
        }
        match self.try_encode(dummy_text, expect_hidden) {
            Ok(Some(neutral)) => {
                let seq = neutral.dims().get(1).copied().unwrap_or(0);
                if seq == expect_seq {
                    Some(neutral)
                } else {
                    tracing::debug!(
                        %tag,
                        "neutral sequence mismatch ({seq} != {expect_seq}); mean fallback"
                    );
                    None
                }
            }
            Ok(None) => {
                tracing::debug!(%tag, "no encoder output matches hidden size {expect_hidden}");
                None
            }
            Err(e) => {
                tracing::warn!(%tag, "dummy encode failed: {e}");
                None
            }
        }
    }

    fn try_encode(&self, dummy_text: &str, expect_hidden: usize) -> Result<Option<Tensor>> {
        let primary = encode_one(self.encoders.primary(), dummy_text)?;
        let secondary = self
            .encoders
            .secondary()
            .map(|enc| encode_one(enc, dummy_text))
            .transpose()?;

        if let Some(ref second) = secondary {
            // Chunked encoders can disagree on length; only then is the
            // concatenation impossible.
            if primary.dims().get(1) == second.dims().get(1) {
                let both = Tensor::cat(&[&primary, second], 2)?;
                if hidden_of(&both) == expect_hidden {
                    return Ok(Some(both));
                }
            }
        }

        if hidden_of(&primary) == expect_hidden {
            return Ok(Some(primary));
        }
        Ok(secondary.filter(|t| hidden_of(t) == expect_hidden))
    }
}

/// Encode one prompt and check the output is 3D.
fn encode_one(encoder: &dyn TextEncoder, text: &str) -> Result<Tensor> {
    let out = encoder.encode(&[text])?;
    if out.rank() != 3 {
        return Err(CutoffError::Shape(format!(
            "encoder output must be [batch, seq, hidden], got {:?}",
            out.dims()
        )));
    }
    Ok(out)
}

fn hidden_of(t: &Tensor) -> usize {
    t.dims().get(2).copied().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;
    use crate::tokenizer::TokenEncoder;

    /// Encoder that ignores the text and returns a constant-filled tensor.
    struct Fixed {
        seq: usize,
        hidden: usize,
        value: f32,
        fail: bool,
    }

    impl Fixed {
        fn boxed(seq: usize, hidden: usize, value: f32) -> Box<dyn TextEncoder> {
            Box::new(Self {
                seq,
                hidden,
                value,
                fail: false,
            })
        }
    }

    impl TokenEncoder for Fixed {
        fn encode_raw(&self, _text: &str) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }
    }

    impl TextEncoder for Fixed {
        fn encode(&self, texts: &[&str]) -> Result<Tensor> {
            if self.fail {
                return Err(CutoffError::Encoder("offline".into()));
            }
            let t = Tensor::ones((texts.len(), self.seq, self.hidden), DType::F32, &Device::Cpu)?;
            Ok((t * f64::from(self.value))?)
        }

        fn tokenizer(&self) -> &dyn TokenEncoder {
            self
        }
    }

    #[test]
    fn dual_encoders_concatenate_on_hidden() {
        let pair = EncoderPair::dual(Fixed::boxed(5, 3, 1.0), Fixed::boxed(5, 2, 2.0));
        let out = NeutralProvider::new(&pair)
            .encode("_ hair", EncoderTag::Secondary, 5, 5)
            .unwrap();
        assert_eq!(out.dims(), &[1, 5, 5]);
        let row: Vec<f32> = out.get(0).unwrap().get(0).unwrap().to_vec1().unwrap();
        assert_eq!(row, vec![1.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn single_encoder_matching_hidden_is_used() {
        let pair = EncoderPair::dual(Fixed::boxed(4, 3, 1.0), Fixed::boxed(4, 2, 2.0));
        let provider = NeutralProvider::new(&pair);
        let primary = provider.encode("x", EncoderTag::Primary, 3, 4).unwrap();
        assert_eq!(primary.dims(), &[1, 4, 3]);
        let secondary = provider.encode("x", EncoderTag::Primary, 2, 4).unwrap();
        assert_eq!(secondary.dims(), &[1, 4, 2]);
    }

    #[test]
    fn no_hidden_match_is_unavailable() {
        let pair = EncoderPair::single(Fixed::boxed(4, 3, 1.0));
        assert!(NeutralProvider::new(&pair)
            .encode("x", EncoderTag::Primary, 8, 4)
            .is_none());
    }

    #[test]
    fn sequence_mismatch_is_unavailable() {
        let pair = EncoderPair::single(Fixed::boxed(6, 3, 1.0));
        assert!(NeutralProvider::new(&pair)
            .encode("x", EncoderTag::Primary, 3, 4)
            .is_none());
    }

    #[test]
    fn empty_text_and_failures_are_unavailable() {
        let pair = EncoderPair::single(Fixed::boxed(4, 3, 1.0));
        assert!(NeutralProvider::new(&pair)
            .encode("", EncoderTag::Primary, 3, 4)
            .is_none());

        let failing = EncoderPair::single(Box::new(Fixed {
            seq: 4,
            hidden: 3,
            value: 1.0,
            fail: true,
        }));
        assert!(NeutralProvider::new(&failing)
            .encode("x", EncoderTag::Primary, 3, 4)
            .is_none());
    }
}
