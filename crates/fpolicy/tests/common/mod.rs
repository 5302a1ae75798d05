//! Shared fakes for integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};

use async_trait::async_trait;
use fpolicy::{AllowList, FeatureEvaluation, FeatureName, InspectorError, PageInspector, PageReloader};

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("fpolicy=debug")
            .with_test_writer()
            .init();
    });
}

/// Page inspector backed by a fixed feature list and a swappable page policy.
#[derive(Debug, Default)]
pub struct FakeInspector {
    supported: Vec<FeatureName>,
    page: Mutex<BTreeMap<FeatureName, FeatureEvaluation>>,
    fail_evaluation: Mutex<bool>,
    unsupported: bool,
    evaluations: AtomicUsize,
}

impl FakeInspector {
    pub fn new(supported: &[&str]) -> Self {
        Self {
            supported: supported.iter().copied().map(FeatureName::from).collect(),
            ..Self::default()
        }
    }

    pub fn unsupported() -> Self {
        Self {
            unsupported: true,
            ..Self::default()
        }
    }

    /// Set what the page reports for a feature, as a header would declare it.
    pub fn declare(&self, feature: &str, allow_list: &str) {
        let allow_list = AllowList::parse(allow_list);
        let evaluation = FeatureEvaluation {
            allowed: allow_list.allows_any(),
            allow_list,
        };
        self.page
            .lock()
            .unwrap()
            .insert(FeatureName::from(feature), evaluation);
    }

    pub fn clear_page(&self) {
        self.page.lock().unwrap().clear();
    }

    pub fn fail_evaluation(&self, fail: bool) {
        *self.fail_evaluation.lock().unwrap() = fail;
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageInspector for FakeInspector {
    async fn list_supported_features(&self) -> Result<Vec<FeatureName>, InspectorError> {
        if self.unsupported {
            return Err(InspectorError::Unsupported(
                "document.featurePolicy is undefined".to_string(),
            ));
        }
        Ok(self.supported.clone())
    }

    async fn evaluate_policy(
        &self,
        features: &[FeatureName],
    ) -> Result<BTreeMap<FeatureName, FeatureEvaluation>, InspectorError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        if *self.fail_evaluation.lock().unwrap() {
            return Err(InspectorError::Evaluation("TypeError".to_string()));
        }

        // Features the page does not declare evaluate to the browser default
        let page = self.page.lock().unwrap();
        Ok(features
            .iter()
            .map(|feature| {
                let evaluation = page.get(feature).cloned().unwrap_or(FeatureEvaluation {
                    allowed: true,
                    allow_list: AllowList::parse("'self'"),
                });
                (feature.clone(), evaluation)
            })
            .collect())
    }
}

/// Reloader that counts requests.
#[derive(Debug, Default)]
pub struct CountingReloader {
    reloads: AtomicUsize,
}

impl CountingReloader {
    pub fn count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl PageReloader for CountingReloader {
    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}
