// src/normalize/header.rs

use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static REPEATED_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

/// Turn a column label into a lowercase `[a-z0-9_]` identifier.
///
/// Distinct labels can collapse to the same identifier (`"Unit Price"` and
/// `"unit-price"` both become `unit_price`); callers get no signal when that
/// happens.
pub fn sanitize_header(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let replaced = NON_ALNUM.replace_all(&lowered, "_");
    let trimmed = replaced.trim_matches('_');
    REPEATED_UNDERSCORE.replace_all(trimmed, "_").into_owned()
}
