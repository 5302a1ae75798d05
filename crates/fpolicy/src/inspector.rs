//! Collaborators the panel relies on: the page inspector and the reload trigger.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{AllowList, FeatureName, PolicyRecord};

/// Errors reported by a [`PageInspector`].
#[derive(Debug, Error)]
pub enum InspectorError {
    /// The page (or browser) does not expose the Feature Policy API.
    #[error("feature policy API unavailable: {0}")]
    Unsupported(String),
    /// Evaluating the policy on the page raised an exception.
    #[error("failed to evaluate page policy: {0}")]
    Evaluation(String),
}

/// How the page's live policy treats one feature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvaluation {
    /// Whether the feature is allowed in the top-level document.
    pub allowed: bool,
    /// Origins allowed to use the feature.
    pub allow_list: AllowList,
}

impl FeatureEvaluation {
    /// Turn the evaluation into an original policy record.
    pub fn into_record(self, feature: FeatureName) -> PolicyRecord {
        PolicyRecord::original(feature, self.allowed, self.allow_list)
    }
}

/// Access to the inspected page's policy.
///
/// Calls cross into the page context and may take a while; the panel awaits
/// them, the background process never does.
#[async_trait]
pub trait PageInspector: Send + Sync {
    /// Every feature name the browser supports.
    async fn list_supported_features(&self) -> Result<Vec<FeatureName>, InspectorError>;

    /// Evaluate the page's policy for the given features.
    async fn evaluate_policy(
        &self,
        features: &[FeatureName],
    ) -> Result<BTreeMap<FeatureName, FeatureEvaluation>, InspectorError>;
}

/// Reloads the inspected page. Fire-and-forget.
pub trait PageReloader: Send + Sync {
    /// Request a reload.
    fn reload(&self);
}
