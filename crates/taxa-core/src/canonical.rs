//! Scientific-name canonicalization.
//!
//! Reduces any scientific-name string to its two-token binomial
//! ("Genus species"), which is the join key between entities, bulk dumps and
//! registry responses.

/// Infraspecific rank markers. Everything from the first marker on is dropped.
const RANK_MARKERS: &[&str] = &[
    "subsp.", "ssp.", "var.", "f.", "cv.", "subsp", "ssp", "var", "cv",
];

/// Hybrid sign. Removed when leading a token or standing alone.
const HYBRID_SIGN: char = '×';

fn is_rank_marker(token: &str) -> bool {
    let lower = token.to_lowercase();
    RANK_MARKERS.contains(&lower.as_str())
}

/// Canonical binomial key for a scientific name.
///
/// Total and idempotent: `canonicalize(&canonicalize(s)) == canonicalize(s)`.
///
/// ```
/// use taxa_core::canonicalize;
///
/// assert_eq!(canonicalize("Saintpaulia ionantha subsp. grandifolia"), "Saintpaulia ionantha");
/// assert_eq!(canonicalize("× Chitalpa tashkentensis"), "Chitalpa tashkentensis");
/// assert_eq!(canonicalize(""), "");
/// ```
pub fn canonicalize(raw: &str) -> String {
    let mut tokens: Vec<&str> = Vec::with_capacity(2);
    for token in raw.split_whitespace() {
        if is_rank_marker(token) {
            break;
        }
        let token = token.trim_start_matches(HYBRID_SIGN);
        if token.is_empty() || token == "x" || token == "X" {
            continue;
        }
        tokens.push(token);
        if tokens.len() == 2 {
            break;
        }
    }
    tokens.join(" ")
}

/// Case-insensitive comparison of two names by canonical key.
pub fn same_binomial(a: &str, b: &str) -> bool {
    canonicalize(a).to_lowercase() == canonicalize(b).to_lowercase()
}
