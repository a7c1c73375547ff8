use std::{fmt::Display, ops::Deref};

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use unicase::UniCase;

/// Name of a searchable item, cheap to clone.
///
/// Equality and hashing ignore case, so two names that only differ in case
/// are the same key. The spelling it was created with is kept for display.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ItemName(UniCase<ArcStr>);

impl Display for ItemName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ItemName {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Case-folded `haystack.contains(needle)`.
#[must_use]
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.is_ascii() && needle.is_ascii() {
        return haystack
            .as_bytes()
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()));
    }

    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl From<String> for ItemName {
    fn from(value: String) -> Self {
        Self(UniCase::new(ArcStr::from(value)))
    }
}

impl From<&str> for ItemName {
    fn from(value: &str) -> Self {
        Self(UniCase::new(ArcStr::from(value)))
    }
}

impl From<ItemName> for String {
    fn from(value: ItemName) -> Self {
        value.as_str().to_owned()
    }
}

impl Deref for ItemName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}
