//! Main-frame response header rewriting.
//!
//! The browser hands the background process the response headers of every
//! top-level document load and waits for the (possibly modified) list to come
//! back. For tabs with an active session the page's `Feature-Policy` headers
//! are collapsed into one authoritative header with the user's overrides
//! applied; everything else passes through untouched.
//!
//! The hook is synchronous: it reads the store already resident in the
//! session and never waits on the panel.

use serde::{Deserialize, Serialize};

use crate::header::{DirectiveSet, FEATURE_POLICY_HEADER, is_feature_policy_header};
use crate::policy::PolicyRecord;
use crate::registry::{TabId, TabRegistry};

/// Frame id of a tab's top-level document.
pub const MAIN_FRAME_ID: i64 = 0;

/// A single HTTP response header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    /// Header name as received.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl HttpHeader {
    /// Create a header.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// What the network layer reports when response headers arrive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersReceivedDetails {
    /// Tab that issued the request.
    pub tab_id: TabId,
    /// Frame that issued the request; [`MAIN_FRAME_ID`] for the top-level document.
    pub frame_id: i64,
    /// Response headers in wire order.
    #[serde(default)]
    pub response_headers: Vec<HttpHeader>,
}

impl HeadersReceivedDetails {
    /// Returns true for the top-level document request.
    pub fn is_main_frame(&self) -> bool {
        self.frame_id == MAIN_FRAME_ID
    }
}

/// Replacement header list handed back to the network layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingResponse {
    /// The headers the browser should use instead of the received ones.
    pub response_headers: Vec<HttpHeader>,
}

/// Collapse `Feature-Policy` headers and apply overrides.
///
/// Non-policy headers keep their order. The page's directives are parsed in
/// header order (last directive per feature wins), then every override
/// replaces the page's allow-list for its feature, declared or not. A single
/// `Feature-Policy` header with directives sorted by feature is appended, or
/// none if no directive remains.
pub fn rewrite_headers<'a>(
    headers: &[HttpHeader],
    overrides: impl IntoIterator<Item = &'a PolicyRecord>,
) -> Vec<HttpHeader> {
    let mut directives = DirectiveSet::new();
    let mut rewritten = Vec::with_capacity(headers.len() + 1);

    for header in headers {
        if is_feature_policy_header(&header.name) {
            directives.extend_from_header(&header.value);
        } else {
            rewritten.push(header.clone());
        }
    }

    for record in overrides {
        directives.set(record.feature.clone(), record.allow_list.clone());
    }

    if let Some(value) = directives.to_header_value() {
        rewritten.push(HttpHeader::new(FEATURE_POLICY_HEADER, value));
    }
    rewritten
}

/// Header hook for the background process.
///
/// Returns `None` (leave the response alone) for sub-frame requests and for
/// tabs without a session, including tabs whose panel disconnected while the
/// request was in flight.
pub fn on_headers_received(
    registry: &TabRegistry,
    details: &HeadersReceivedDetails,
) -> Option<BlockingResponse> {
    if !details.is_main_frame() {
        return None;
    }

    let Some(session) = registry.lookup(details.tab_id) else {
        tracing::debug!(tab_id = %details.tab_id, "no session, passing headers through");
        return None;
    };

    let response_headers = rewrite_headers(&details.response_headers, session.header_overrides());
    tracing::debug!(
        tab_id = %details.tab_id,
        headers = response_headers.len(),
        "rewrote main-frame headers"
    );
    Some(BlockingResponse { response_headers })
}
