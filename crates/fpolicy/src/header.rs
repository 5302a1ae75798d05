//! `Feature-Policy` header codec.
//!
//! # Wire Format
//!
//! ```text
//! Feature-Policy: <feature> <origin>[ <origin>...][; <feature> <origin>...]*
//! ```
//!
//! Directives are separated by `;`, tokens inside a directive by whitespace.
//! The first token names the feature, the rest form its allow-list. When the
//! same feature appears more than once, across one or several headers, the
//! last directive wins; allow-lists are never merged.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::policy::{AllowList, FeatureName, OriginToken};

/// Name of the header this crate reads and emits.
pub const FEATURE_POLICY_HEADER: &str = "Feature-Policy";

/// Returns true if a header name refers to `Feature-Policy` (case-insensitive).
pub fn is_feature_policy_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(FEATURE_POLICY_HEADER)
}

/// Parsed directives, one allow-list per feature, sorted by feature name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DirectiveSet(BTreeMap<FeatureName, AllowList>);

impl DirectiveSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single header value.
    pub fn parse(value: &str) -> Self {
        let mut set = Self::new();
        set.extend_from_header(value);
        set
    }

    /// Apply the directives of one header value on top of this set.
    pub fn extend_from_header(&mut self, value: &str) {
        for directive in value.split(';') {
            let mut tokens = directive.split_whitespace();
            let Some(feature) = tokens.next() else {
                continue;
            };
            let allow_list = tokens.map(OriginToken::parse).collect();
            self.0.insert(FeatureName::from(feature), allow_list);
        }
    }

    /// Set the allow-list of a feature, replacing any previous one.
    pub fn set(&mut self, feature: FeatureName, allow_list: AllowList) {
        self.0.insert(feature, allow_list);
    }

    /// The allow-list declared for a feature.
    pub fn get(&self, feature: &str) -> Option<&AllowList> {
        self.0.get(feature)
    }

    /// Number of features with a directive.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no directives.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate directives in feature order.
    pub fn iter(&self) -> impl Iterator<Item = (&FeatureName, &AllowList)> {
        self.0.iter()
    }

    /// The header value for this set, or `None` when there is nothing to emit.
    pub fn to_header_value(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl fmt::Display for DirectiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (feature, allow_list)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", feature)?;
            if !allow_list.is_empty() {
                write!(f, " {}", allow_list)?;
            }
        }
        Ok(())
    }
}

impl FromIterator<(FeatureName, AllowList)> for DirectiveSet {
    fn from_iter<I: IntoIterator<Item = (FeatureName, AllowList)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a DirectiveSet {
    type Item = (&'a FeatureName, &'a AllowList);
    type IntoIter = std::collections::btree_map::Iter<'a, FeatureName, AllowList>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
