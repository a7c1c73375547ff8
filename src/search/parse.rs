//! The query language.
//!
//! `a&b` requires both terms, `a!b` requires `a` and rejects `b`.
//! `\&` and `\!` are literal characters.

use std::sync::Arc;

const INCLUDE_CHARACTER: char = '&';
const EXCLUDE_CHARACTER: char = '!';
const ESCAPE_CHARACTER: char = '\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    Include,
    Exclude,
}

/// One parsed `(term, match type)` token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub term: String,
    pub match_type: MatchType,
}

impl SearchQuery {
    #[must_use]
    pub fn include(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            match_type: MatchType::Include,
        }
    }

    #[must_use]
    pub fn exclude(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            match_type: MatchType::Exclude,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_include(&self) -> bool {
        self.match_type == MatchType::Include
    }
}

/// A parsed query, shared between every source that evaluates it.
pub type Tokens = Arc<[SearchQuery]>;

/// Splits a raw query into tokens.
///
/// An empty string gives no tokens, which callers treat as "no query".
#[must_use]
pub fn parse(raw: &str) -> Vec<SearchQuery> {
    if raw.is_empty() {
        return Vec::new();
    }

    if !raw.contains(INCLUDE_CHARACTER) && !raw.contains(EXCLUDE_CHARACTER) {
        return vec![SearchQuery::include(raw)];
    }

    // "lol&lmao!tldr!stfu&cool" becomes
    // [lol, lmao, !tldr, !stfu, cool]
    split_unescaped(raw, INCLUDE_CHARACTER)
        .into_iter()
        .map(|include| unescape(include, INCLUDE_CHARACTER))
        .flat_map(|include| {
            split_unescaped(&include, EXCLUDE_CHARACTER)
                .into_iter()
                .enumerate()
                .map(|(index, piece)| {
                    let term = unescape(piece, EXCLUDE_CHARACTER);
                    if index == 0 {
                        SearchQuery::include(term)
                    } else {
                        SearchQuery::exclude(term)
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|query| !query.term.is_empty())
        .collect()
}

/// Splits on `delimiter` unless the delimiter directly follows a backslash.
fn split_unescaped(input: &str, delimiter: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut previous = None;

    for (index, ch) in input.char_indices() {
        if ch == delimiter && previous != Some(ESCAPE_CHARACTER) {
            pieces.push(&input[start..index]);
            start = index + ch.len_utf8();
        }
        previous = Some(ch);
    }
    pieces.push(&input[start..]);

    pieces
}

fn unescape(input: &str, delimiter: char) -> String {
    input.replace(&format!("{ESCAPE_CHARACTER}{delimiter}"), &delimiter.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inc(term: &str) -> SearchQuery {
        SearchQuery::include(term)
    }

    fn exc(term: &str) -> SearchQuery {
        SearchQuery::exclude(term)
    }

    #[test]
    fn empty_input_is_no_query() {
        assert_eq!(parse(""), Vec::<SearchQuery>::new());
    }

    #[test]
    fn plain_text_is_a_single_include() {
        assert_eq!(parse("hello world"), vec![inc("hello world")]);
    }

    #[test]
    fn parses_include_and_exclude() {
        assert_eq!(parse("a&b"), vec![inc("a"), inc("b")]);
        assert_eq!(parse("a!b"), vec![inc("a"), exc("b")]);
        assert_eq!(
            parse("a&b!c!d&e"),
            vec![inc("a"), inc("b"), exc("c"), exc("d"), inc("e")]
        );
    }

    #[test]
    fn escaped_delimiters_are_literal() {
        assert_eq!(parse("a\\&b"), vec![inc("a&b")]);
        assert_eq!(parse("wow\\!"), vec![inc("wow!")]);
        assert_eq!(parse("a\\!b!c"), vec![inc("a!b"), exc("c")]);
        assert_eq!(parse("rock\\&roll!live"), vec![inc("rock&roll"), exc("live")]);
    }

    #[test]
    fn drops_empty_tokens() {
        assert_eq!(parse("&&"), Vec::<SearchQuery>::new());
        assert_eq!(parse("!&!"), Vec::<SearchQuery>::new());
        assert_eq!(parse("a&&b"), vec![inc("a"), inc("b")]);
        assert_eq!(parse("&a!"), vec![inc("a")]);
        assert_eq!(parse("!b"), vec![exc("b")]);
    }

    #[test]
    fn keeps_non_ascii_terms() {
        assert_eq!(parse("größe!ä"), vec![inc("größe"), exc("ä")]);
    }
}
