// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dummy prompt construction.
//!
//! The neutral conditioning is obtained by re-encoding the prompt with the
//! target words blanked out.  Blanking is textual (whole-word,
//! case-insensitive regex replacement), not token-level, so it can drift
//! from the token-level source rows when the tokenizer normalizes text
//! differently from `\b` word boundaries (e.g. words glued to digits or
//! apostrophes).  That drift is accepted: the dummy prompt only has to be
//! "the prompt without the targets" closely enough to encode to the same
//! sequence length, and the blend stage falls back to the mean vector
//! whenever it does not.

use regex::RegexBuilder;

/// Replacement for every blanked word.
pub const PLACEHOLDER: &str = "_";

/// Replace each whole-word, case-insensitive occurrence of `words` in
/// `text` with [`PLACEHOLDER`].
///
/// Words are regex-escaped; empty words are skipped.  Words are applied in
/// order, so a later word can match inside text produced by an earlier
/// replacement only if it matches the placeholder itself.
///
/// ```
/// use candle_cutoff::util::dummy::build_dummy_text;
///
/// let words = vec!["blue".to_string()];
/// assert_eq!(build_dummy_text("Blue hair, bluebird", &words), "_ hair, bluebird");
/// ```
#[must_use]
pub fn build_dummy_text(text: &str, words: &[String]) -> String {
    let mut out = text.to_owned();
    for word in words.iter().filter(|w| !w.is_empty()) {
        let pattern = format!(r"\b{}\b", regex::escape(word));
        match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(re) => out = re.replace_all(&out, PLACEHOLDER).into_owned(),
            Err(e) => {
                // Escaped literals always compile; a failure means the regex
                // size limit was hit, and the word is left in place.
                tracing::warn!(word = %word, "dummy text: pattern rejected: {e}");
            }
        }
    }
    out
}
