//! fpolicy: Feature-Policy override engine
//!
//! fpolicy powers a developer-tools extension that lets a developer override
//! the `Feature-Policy` of the inspected page. The panel keeps the page's
//! original policy and the user's overrides in a [`PolicyStore`]; the
//! background process mirrors that store per tab and rewrites the
//! `Feature-Policy` header of every main-frame response so the overrides take
//! effect on reload.

pub mod background;
pub mod channel;
pub mod config;
pub mod header;
pub mod inspector;
pub mod navigation;
pub mod panel;
pub mod policy;
pub mod registry;
pub mod rewriter;

pub use background::{Background, BackgroundEvent, BackgroundHandle};
pub use channel::{ChannelError, ChannelId, ChannelMessage, PanelPort};
pub use config::{BackgroundConfig, PanelConfig};
pub use header::{DirectiveSet, FEATURE_POLICY_HEADER};
pub use inspector::{FeatureEvaluation, InspectorError, PageInspector, PageReloader};
pub use navigation::{NavigationAction, NavigationReconciler, NavigationState};
pub use panel::{ErrorDisplay, Panel, PanelError};
pub use policy::{AllowList, FeatureName, OriginToken, PolicyError, PolicyRecord, PolicyStore};
pub use registry::{TabId, TabRegistry, TabSession};
pub use rewriter::{BlockingResponse, HeadersReceivedDetails, HttpHeader, rewrite_headers};
