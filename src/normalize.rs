//! Text canonicalization for names and emails
//!
//! Commit metadata arrives with inconsistent accents, casing and whitespace.
//! Everything the pipeline compares goes through [`normalize`] first so that
//! `"Maxime  DUPONT"` and `"maxime dupont"` land on the same key.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonicalize a name or email: strip diacritics (NFD, drop Mn marks, NFC),
/// collapse every whitespace run (including tabs, newlines and U+3000) to a
/// single ASCII space, trim, and lowercase.
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(s: &str) -> String {
    let stripped: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .nfc()
        .collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

static PARENS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^(]+)\s+\(([^)]+)\)").expect("invalid parens regex"));

/// Strip a trailing parenthesized clause preceded by whitespace.
///
/// Diagnostic name cleanup only; `"Bob Smith (at work)"` becomes `"Bob Smith"`.
pub fn remove_parens(name: &str) -> String {
    PARENS_RE.replace_all(name, "$1").into_owned()
}
