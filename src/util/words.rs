// SPDX-License-Identifier: MIT OR Apache-2.0

//! Word-list parsing for target, exclude, and processing-target options.
//!
//! Option strings are free-form: `"blue, red"`, `"blue red"`, and
//! `"blue，red"` (full-width comma) all yield `["blue", "red"]`.

/// Whether `c` separates words in an option string.
fn is_separator(c: char) -> bool {
    c == ',' || c == '\u{FF0C}' || c.is_whitespace()
}

/// Split an option string into trimmed, lower-cased words.
///
/// Empty entries are dropped; duplicates and order are kept.
///
/// ```
/// use candle_cutoff::util::words::parse_word_list;
///
/// assert_eq!(parse_word_list(" Blue hair,red，Dress "), ["blue", "hair", "red", "dress"]);
/// assert!(parse_word_list(" , ").is_empty());
/// ```
#[must_use]
pub fn parse_word_list(s: &str) -> Vec<String> {
    s.split(is_separator)
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Canonical form of a target string: the parsed words joined by `,`.
///
/// Two option strings that parse to the same word list compare equal, so
/// a canonical snapshot taken at tokenization time can be checked against
/// the option value at blend time.
///
/// ```
/// use candle_cutoff::util::words::canonical_targets;
///
/// assert_eq!(canonical_targets("Blue  Hair, red"), "blue,hair,red");
/// assert_eq!(canonical_targets(""), "");
/// ```
#[must_use]
pub fn canonical_targets(s: &str) -> String {
    parse_word_list(s).join(",")
}
