use crate::{
    items::{DisplayName, WeightedItem, item_name::contains_ignore_case},
    search::{
        parse::{MatchType, SearchQuery},
        weigh::weigh,
    },
};

/// Lazily filters and weighs `items` against `tokens`.
///
/// An item is kept when every include term appears in its display name and
/// no exclude term does. Weight uses the first token's term only. An empty
/// query matches nothing.
pub fn filter<'a, T, I>(
    items: I,
    tokens: &'a [SearchQuery],
) -> impl Iterator<Item = WeightedItem<T>> + 'a
where
    I: IntoIterator<Item = &'a T>,
    I::IntoIter: 'a,
    T: DisplayName + Clone + 'a,
{
    let primary = primary_term(tokens);

    items
        .into_iter()
        .take_while(move |_| primary.is_some())
        .filter(move |item| is_match(item.display_name(), tokens))
        .map(move |item| WeightedItem {
            weight: weigh(item.display_name(), primary.unwrap_or_default()),
            item: item.clone(),
        })
}

/// Weighs items that were already matched elsewhere (the file index).
pub fn weigh_all<'a, T, I>(
    items: I,
    tokens: &'a [SearchQuery],
) -> impl Iterator<Item = WeightedItem<T>> + 'a
where
    I: IntoIterator<Item = T>,
    I::IntoIter: 'a,
    T: DisplayName + 'a,
{
    let primary = primary_term(tokens);

    items
        .into_iter()
        .take_while(move |_| primary.is_some())
        .map(move |item| WeightedItem {
            weight: weigh(item.display_name(), primary.unwrap_or_default()),
            item,
        })
}

/// The weighting reference, `None` when the query is empty.
fn primary_term(tokens: &[SearchQuery]) -> Option<&str> {
    tokens
        .first()
        .map(|token| token.term.as_str())
        .filter(|term| !term.is_empty())
}

#[must_use]
pub fn is_match(display_name: &str, tokens: &[SearchQuery]) -> bool {
    tokens.iter().all(|token| {
        let contains = contains_ignore_case(display_name, &token.term);
        match token.match_type {
            MatchType::Include => contains,
            MatchType::Exclude => !contains,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        items::{FileItem, SettingItem},
        search::parse::parse,
    };

    fn names(items: &[&str]) -> Vec<FileItem> {
        items.iter().map(|name| FileItem::new(name)).collect()
    }

    fn matched(items: &[FileItem], raw: &str) -> Vec<(String, u32)> {
        let tokens = parse(raw);
        filter(items, &tokens)
            .map(|weighted| (weighted.item.path.to_string(), weighted.weight))
            .collect()
    }

    #[test]
    fn empty_query_matches_nothing() {
        let items = names(&["a", "b"]);
        assert!(matched(&items, "").is_empty());
        assert!(filter(&items, &[SearchQuery::include("")]).next().is_none());
    }

    #[test]
    fn include_and_exclude_membership() {
        let items = names(&["photos 2024", "photos 2023", "music 2024"]);
        assert_eq!(
            matched(&items, "photos!2023"),
            vec![("photos 2024".to_owned(), 3)]
        );
        assert_eq!(
            matched(&items, "2024&music"),
            vec![("music 2024".to_owned(), 1)]
        );
    }

    #[test]
    fn weight_comes_from_first_token_only() {
        let items = names(&["notes todo"]);
        // "todo" would be a word match, but only "notes" counts.
        assert_eq!(matched(&items, "notes&todo"), vec![("notes todo".to_owned(), 3)]);
        assert_eq!(matched(&items, "tes&todo"), vec![("notes todo".to_owned(), 0)]);
    }

    #[test]
    fn membership_matches_predicate_for_every_item() {
        let items = names(&[
            "Alpha Beta",
            "alphabet",
            "BETA",
            "gamma!",
            "a&b",
            "",
        ]);
        for raw in ["a", "a!b", "beta&alpha", "a\\&b", "gamma\\!", "x!y", "!a"] {
            let tokens = parse(raw);
            let kept: Vec<_> = filter(&items, &tokens).map(|w| w.item).collect();
            for item in &items {
                let expected = tokens.first().is_some_and(|t| !t.term.is_empty())
                    && tokens.iter().all(|t| {
                        let has = item.path.to_lowercase().contains(&t.term.to_lowercase());
                        if t.is_include() { has } else { !has }
                    });
                assert_eq!(kept.contains(item), expected, "{raw:?} / {:?}", item.path);
            }
            for weighted in filter(&items, &tokens) {
                assert_eq!(weighted.weight, weigh(&weighted.item.path, &tokens[0].term));
            }
        }
    }

    #[test]
    fn filter_is_restartable() {
        let items = vec![SettingItem::new("s1", "settings_files", "v")];
        let tokens = parse("files");
        assert_eq!(filter(&items, &tokens).count(), 1);
        assert_eq!(filter(&items, &tokens).count(), 1);
    }

    #[test]
    fn weigh_all_keeps_everything() {
        let tokens = parse("file");
        let weighted: Vec<_> = weigh_all(names(&["file1", "file2.mp3", "other"]), &tokens)
            .map(|w| w.weight)
            .collect();
        assert_eq!(weighted, vec![2, 2, 0]);
        assert_eq!(weigh_all(names(&["file1"]), &[]).count(), 0);
    }
}
