use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Canonical comparison form of `input`: lowercased, accents stripped, trimmed.
///
/// Lowercasing happens before decomposition because some uppercase letters
/// (`İ`) lowercase into a base letter plus a combining mark, which would
/// otherwise survive the first pass and break idempotence.
pub fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .trim()
        .to_string()
}
