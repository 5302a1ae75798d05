//! Value types describing one feature's policy state.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a browser feature controlled by Feature Policy (e.g. `geolocation`).
///
/// Names are case-sensitive and compared lexicographically, which is also the
/// order used for display and header emission.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureName(String);

impl FeatureName {
    /// Create a feature name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The feature name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for FeatureName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for FeatureName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One entry of an allow-list.
///
/// Parsing never fails: anything that is not a keyword is kept as an origin
/// string, so `OriginToken::from(s).to_string() == s` for every token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OriginToken {
    /// `*`, every origin.
    Any,
    /// `'none'`, no origin.
    None,
    /// `'self'`, the document's own origin.
    SelfOrigin,
    /// `'src'`, the origin of the iframe's `src`.
    Src,
    /// An explicit origin such as `https://example.com`.
    Origin(String),
}

impl OriginToken {
    /// Classify a single whitespace-free token.
    pub fn parse(token: &str) -> Self {
        match token {
            "*" => OriginToken::Any,
            "'none'" => OriginToken::None,
            "'self'" => OriginToken::SelfOrigin,
            "'src'" => OriginToken::Src,
            other => OriginToken::Origin(other.to_string()),
        }
    }
}

impl fmt::Display for OriginToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginToken::Any => f.write_str("*"),
            OriginToken::None => f.write_str("'none'"),
            OriginToken::SelfOrigin => f.write_str("'self'"),
            OriginToken::Src => f.write_str("'src'"),
            OriginToken::Origin(origin) => f.write_str(origin),
        }
    }
}

impl From<&str> for OriginToken {
    fn from(token: &str) -> Self {
        OriginToken::parse(token)
    }
}

impl From<String> for OriginToken {
    fn from(token: String) -> Self {
        match OriginToken::parse(&token) {
            OriginToken::Origin(_) => OriginToken::Origin(token),
            keyword => keyword,
        }
    }
}

impl From<OriginToken> for String {
    fn from(token: OriginToken) -> Self {
        match token {
            OriginToken::Origin(origin) => origin,
            keyword => keyword.to_string(),
        }
    }
}

/// Ordered list of origins permitted to use a feature.
///
/// Order is kept so headers re-emit exactly as parsed; it carries no meaning
/// for matching.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(Vec<OriginToken>);

impl AllowList {
    /// Create an allow-list from tokens.
    pub fn new(tokens: Vec<OriginToken>) -> Self {
        Self(tokens)
    }

    /// `['*']`
    pub fn all() -> Self {
        Self(vec![OriginToken::Any])
    }

    /// `["'none'"]`
    pub fn none() -> Self {
        Self(vec![OriginToken::None])
    }

    /// The allow-list an override uses for the given allowed state.
    pub fn for_allowed(allowed: bool) -> Self {
        if allowed { Self::all() } else { Self::none() }
    }

    /// Parse whitespace-separated tokens.
    pub fn parse(tokens: &str) -> Self {
        tokens.split_whitespace().map(OriginToken::parse).collect()
    }

    /// The tokens in declaration order.
    pub fn tokens(&self) -> &[OriginToken] {
        &self.0
    }

    /// Returns true if the list has no tokens.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if at least one origin could use the feature.
    pub fn allows_any(&self) -> bool {
        self.0.iter().any(|token| *token != OriginToken::None)
    }
}

impl FromIterator<OriginToken> for AllowList {
    fn from_iter<I: IntoIterator<Item = OriginToken>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", token)?;
        }
        Ok(())
    }
}

/// Policy state of a single feature.
///
/// `allow_list` is authoritative; `allowed` is the convenience flag reported
/// by the page (or chosen by the user for an override).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRecord {
    /// The feature this record describes.
    pub feature: FeatureName,
    /// Whether the feature is allowed in the top-level document.
    pub allowed: bool,
    /// Origins permitted to use the feature.
    pub allow_list: AllowList,
    /// True for user overrides, false for the page's own declaration.
    pub customized: bool,
}

impl PolicyRecord {
    /// A record as evaluated on the page.
    pub fn original(feature: impl Into<FeatureName>, allowed: bool, allow_list: AllowList) -> Self {
        Self {
            feature: feature.into(),
            allowed,
            allow_list,
            customized: false,
        }
    }

    /// A record declared by a header directive, with `allowed` derived from the list.
    pub fn declared(feature: impl Into<FeatureName>, allow_list: AllowList) -> Self {
        let allowed = allow_list.allows_any();
        Self::original(feature, allowed, allow_list)
    }

    /// A user override. The allow-list is `*` when allowed and `'none'` otherwise.
    pub fn customized(feature: impl Into<FeatureName>, allowed: bool) -> Self {
        Self {
            feature: feature.into(),
            allowed,
            allow_list: AllowList::for_allowed(allowed),
            customized: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_token_keywords() {
        assert_eq!(OriginToken::parse("*"), OriginToken::Any);
        assert_eq!(OriginToken::parse("'none'"), OriginToken::None);
        assert_eq!(OriginToken::parse("'self'"), OriginToken::SelfOrigin);
        assert_eq!(OriginToken::parse("'src'"), OriginToken::Src);
        assert_eq!(
            OriginToken::parse("https://example.com"),
            OriginToken::Origin("https://example.com".to_string())
        );
    }

    #[test]
    fn test_origin_token_is_lossless() {
        // Keywords are case-sensitive, so an upper-cased one stays an origin
        for raw in ["*", "'none'", "'self'", "'src'", "https://a.test", "'NONE'"] {
            assert_eq!(OriginToken::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_allow_list_display() {
        let list = AllowList::parse("'self'   https://a.test  https://b.test");
        assert_eq!(list.to_string(), "'self' https://a.test https://b.test");
        assert_eq!(AllowList::all().to_string(), "*");
        assert_eq!(AllowList::none().to_string(), "'none'");
    }

    #[test]
    fn test_allows_any() {
        assert!(AllowList::all().allows_any());
        assert!(AllowList::parse("'self'").allows_any());
        assert!(!AllowList::none().allows_any());
        assert!(!AllowList::default().allows_any());
    }

    #[test]
    fn test_customized_record() {
        let on = PolicyRecord::customized("camera", true);
        assert!(on.customized);
        assert_eq!(on.allow_list, AllowList::all());

        let off = PolicyRecord::customized("camera", false);
        assert!(!off.allowed);
        assert_eq!(off.allow_list, AllowList::none());
    }

    #[test]
    fn test_record_serialization_format() {
        let record = PolicyRecord::original("usb", true, AllowList::parse("'self' https://a.test"));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "feature": "usb",
                "allowed": true,
                "allowList": ["'self'", "https://a.test"],
                "customized": false,
            })
        );

        let back: PolicyRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
