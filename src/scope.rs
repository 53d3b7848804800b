//! Scope sets and caller scope normalization.
//!
//! A [`ScopeSet`] is always normalized: empty tokens are discarded,
//! duplicates collapse, and case is kept as provided. Only a single scope
//! string is split on whitespace; sequence entries are taken verbatim.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized set of opaque scope identifiers.
///
/// Ordering is irrelevant for comparison; iteration is lexicographic so the
/// space-joined form is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Create an empty scope set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Iterate the scopes in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Set union, leaving both operands untouched.
    #[must_use]
    pub fn union(&self, other: &ScopeSet) -> ScopeSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// Whether every scope in `self` is also in `other`.
    pub fn is_subset(&self, other: &ScopeSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Whether every scope in `other` is also in `self`.
    pub fn is_superset(&self, other: &ScopeSet) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Space-separated form used on the wire (`scope=` parameters).
    pub fn to_scope_string(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_scope_string())
    }
}

impl<S: AsRef<str>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<S: AsRef<str>> Extend<S> for ScopeSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(
            iter.into_iter()
                .map(|item| item.as_ref().to_string())
                .filter(|item| !item.is_empty()),
        );
    }
}

impl IntoIterator for ScopeSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ScopeSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<String>> for ScopeSet {
    fn from(list: Vec<String>) -> Self {
        list.into_iter().collect()
    }
}

impl From<ScopeSet> for Vec<String> {
    fn from(set: ScopeSet) -> Self {
        set.0.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Caller input
// ---------------------------------------------------------------------------

/// The shapes in which application code may pass requested scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScopeInput {
    /// No scopes requested beyond the provider defaults.
    #[default]
    Absent,
    /// A single token or a whitespace-separated list of tokens.
    Text(String),
    /// An explicit ordered sequence of tokens.
    List(Vec<String>),
}

impl From<&str> for ScopeInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ScopeInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for ScopeInput {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

impl From<Vec<String>> for ScopeInput {
    fn from(list: Vec<String>) -> Self {
        Self::List(list)
    }
}

impl From<Vec<&str>> for ScopeInput {
    fn from(list: Vec<&str>) -> Self {
        Self::List(list.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for ScopeInput {
    fn from(list: &[&str]) -> Self {
        Self::List(list.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ScopeInput {
    fn from(list: [&str; N]) -> Self {
        Self::List(list.iter().map(|s| s.to_string()).collect())
    }
}

impl From<ScopeSet> for ScopeInput {
    fn from(set: ScopeSet) -> Self {
        Self::List(set.into())
    }
}

impl From<&ScopeSet> for ScopeInput {
    fn from(set: &ScopeSet) -> Self {
        Self::List(set.iter().map(str::to_string).collect())
    }
}

impl<T: Into<ScopeInput>> From<Option<T>> for ScopeInput {
    fn from(input: Option<T>) -> Self {
        input.map_or(Self::Absent, Into::into)
    }
}

/// Normalize caller-supplied scopes into a [`ScopeSet`].
///
/// Absent input yields the empty set. Text is split on whitespace; list
/// entries are kept as given, so `["repo user"]` holds one token. Empty
/// tokens are dropped and duplicates collapse.
///
/// The function is pure and idempotent: feeding a normalized set back in
/// returns an equal set.
pub fn normalize_scopes(input: impl Into<ScopeInput>) -> ScopeSet {
    match input.into() {
        ScopeInput::Absent => ScopeSet::new(),
        ScopeInput::Text(text) => text.split_whitespace().collect(),
        ScopeInput::List(list) => list.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(items: &[&str]) -> ScopeSet {
        items.iter().collect()
    }

    #[test]
    fn test_normalize_absent() {
        assert!(normalize_scopes(None::<&str>).is_empty());
        assert!(normalize_scopes(ScopeInput::Absent).is_empty());
    }

    #[test]
    fn test_normalize_single_token() {
        assert_eq!(normalize_scopes("repo"), set(&["repo"]));
    }

    #[test]
    fn test_normalize_space_separated() {
        let scopes = normalize_scopes("repo  issues\tgist\nrepo ");
        assert_eq!(scopes, set(&["repo", "issues", "gist"]));
        assert_eq!(scopes.len(), 3);
    }

    #[test]
    fn test_normalize_empty_string() {
        assert!(normalize_scopes("").is_empty());
        assert!(normalize_scopes("   ").is_empty());
    }

    #[test]
    fn test_normalize_list_dedup_and_drop_empty() {
        let scopes = normalize_scopes(vec!["repo", "", "repo", "user"]);
        assert_eq!(scopes, set(&["repo", "user"]));
    }

    #[test]
    fn test_normalize_preserves_case() {
        let scopes = normalize_scopes(["Repo", "repo"]);
        assert_eq!(scopes.len(), 2);
        assert!(scopes.contains("Repo"));
        assert!(scopes.contains("repo"));
    }

    #[test]
    fn test_union_and_subset() {
        let cached = set(&["repo", "user"]);
        let wanted = set(&["repo", "issues"]);
        assert!(!wanted.is_subset(&cached));

        let merged = cached.union(&wanted);
        assert_eq!(merged, set(&["issues", "repo", "user"]));
        assert!(wanted.is_subset(&merged));
        assert!(merged.is_superset(&cached));
        assert!(ScopeSet::new().is_subset(&cached));
    }

    #[test]
    fn test_scope_string_is_sorted() {
        let scopes = normalize_scopes("user repo gist");
        assert_eq!(scopes.to_scope_string(), "gist repo user");
        assert_eq!(scopes.to_string(), "gist repo user");
    }

    #[test]
    fn test_serde_normalizes_on_deserialize() {
        let scopes: ScopeSet = serde_json::from_str(r#"["repo", "repo", "", "a b"]"#).unwrap();
        assert_eq!(scopes, set(&["a b", "repo"]));
        assert_eq!(serde_json::to_string(&scopes).unwrap(), r#"["a b","repo"]"#);
    }

    #[test]
    fn test_list_entries_are_kept_verbatim() {
        let scopes = normalize_scopes(vec!["repo user", " gist", "repo"]);
        assert_eq!(scopes.len(), 3);
        assert!(scopes.contains("repo user"));
        assert!(scopes.contains(" gist"));
        assert!(!scopes.contains("user"));
        assert_eq!(normalize_scopes("repo user"), set(&["repo", "user"]));
    }

    fn text_input() -> impl Strategy<Value = ScopeInput> {
        let token = "[a-zA-Z:_]{0,6}";
        prop_oneof![
            Just(ScopeInput::Absent),
            token.prop_map(ScopeInput::Text),
            proptest::collection::vec(token, 0..6)
                .prop_map(|tokens| ScopeInput::Text(tokens.join(" \t"))),
        ]
    }

    fn scope_input() -> impl Strategy<Value = ScopeInput> {
        prop_oneof![
            text_input(),
            proptest::collection::vec("[a-z ]{0,8}", 0..6).prop_map(ScopeInput::List),
        ]
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(input in scope_input()) {
            let once = normalize_scopes(input);
            let again = normalize_scopes(&once);
            prop_assert_eq!(&once, &again);
        }

        #[test]
        fn text_round_trips_through_wire_form(input in text_input()) {
            let once = normalize_scopes(input);
            prop_assert!(once.iter().all(|s| !s.contains(char::is_whitespace)));
            prop_assert_eq!(&once, &normalize_scopes(once.to_scope_string()));
        }

        #[test]
        fn normalized_sets_hold_no_empty_tokens(input in scope_input()) {
            let scopes = normalize_scopes(input);
            prop_assert!(scopes.iter().all(|s| !s.is_empty()));
        }
    }
}
