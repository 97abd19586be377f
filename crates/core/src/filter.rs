//! Read-side query inputs (`authors=` and `relations=` parameters).

use std::collections::BTreeSet;

use crate::id::AuthorId;

/// Name of the relation that asks for post enrichment.
pub const POSTS_RELATION: &str = "posts";

fn split_csv(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Set of related-data names requested by a read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relations(BTreeSet<String>);

impl Relations {
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list (`"posts, comments"`); blanks are dropped.
    pub fn parse(raw: Option<&str>) -> Self {
        Self(
            raw.map(|r| split_csv(r).map(|s| s.to_ascii_lowercase()).collect())
                .unwrap_or_default(),
        )
    }

    pub fn includes(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn includes_posts(&self) -> bool {
        self.includes(POSTS_RELATION)
    }
}

/// Items are normalized like [`Relations::parse`]: trimmed, lowercased, blanks dropped.
impl<S: Into<String>> FromIterator<S> for Relations {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(Into::into)
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

/// Filter for author listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorFilter {
    /// Restrict to these ids. `None` lists everything.
    pub ids: Option<Vec<AuthorId>>,
}

impl AuthorFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse the `authors=` parameter; an empty list means "no restriction".
    pub fn parse(raw: Option<&str>) -> Self {
        let ids: Vec<AuthorId> = raw
            .map(|r| split_csv(r).map(AuthorId::from).collect())
            .unwrap_or_default();
        Self {
            ids: if ids.is_empty() { None } else { Some(ids) },
        }
    }

    pub fn matches(&self, id: &AuthorId) -> bool {
        match &self.ids {
            Some(ids) => ids.contains(id),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn relations_parse_trims_and_lowercases() {
        let rel = Relations::parse(Some(" Posts , ,comments"));
        assert!(rel.includes_posts());
        assert!(rel.includes("comments"));
        assert!(!Relations::parse(None).includes_posts());
        assert!(!Relations::parse(Some("")).includes_posts());
    }

    #[test]
    fn collected_relations_are_normalized_like_parsed_ones() {
        let rel: Relations = [" Posts ", "", "COMMENTS"].into_iter().collect();
        assert!(rel.includes_posts());
        assert!(rel.includes("comments"));
        assert_eq!(rel, Relations::parse(Some("posts,comments")));
    }

    #[test]
    fn empty_author_filter_matches_everything() {
        let f = AuthorFilter::parse(Some(" , "));
        assert_eq!(f, AuthorFilter::all());
        assert!(f.matches(&AuthorId::from("anything")));
    }

    #[test]
    fn author_filter_restricts_to_listed_ids() {
        let f = AuthorFilter::parse(Some("a1,a2"));
        assert!(f.matches(&AuthorId::from("a2")));
        assert!(!f.matches(&AuthorId::from("a3")));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every non-blank listed id is matched, and nothing else is.
        #[test]
        fn author_filter_matches_exactly_the_listed_ids(
            ids in prop::collection::vec("[a-z0-9]{1,6}", 1..6),
            candidate in "[a-z0-9]{1,6}",
        ) {
            let f = AuthorFilter::parse(Some(&ids.join(",")));
            for id in &ids {
                prop_assert!(f.matches(&AuthorId::from(id.as_str())));
            }
            prop_assert_eq!(f.matches(&AuthorId::from(candidate.as_str())), ids.contains(&candidate));
        }
    }
}
