use unicase::UniCase;

use crate::items::Weight;

const PREFIX_WEIGHT: Weight = 2;
const WORD_WEIGHT: Weight = 1;

/// Relevance of `display_name` for `term`, case-insensitive. In `0..=3`.
///
/// Only a sort hint: whether an item matches at all is decided by
/// [`crate::search::filter`].
#[must_use]
pub fn weigh(display_name: &str, term: &str) -> Weight {
    let mut weight = 0;

    // Name starts with search
    if starts_with_ignore_case(display_name, term) {
        weight += PREFIX_WEIGHT;
    }

    // Search matches a word in name
    let term = UniCase::new(term);
    if display_name
        .split_whitespace()
        .any(|word| UniCase::new(word) == term)
    {
        weight += WORD_WEIGHT;
    }

    weight
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    if haystack.is_ascii() && prefix.is_ascii() {
        return haystack.len() >= prefix.len()
            && haystack.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes());
    }

    haystack.to_lowercase().starts_with(&prefix.to_lowercase())
}
