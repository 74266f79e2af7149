pub mod hash;
pub mod station;
pub mod track;

/// Lowercases, trims and collapses inner whitespace.
///
/// Used wherever two spellings of the same artist or title must compare equal.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
