//! Developer-tools panel controller.
//!
//! The panel owns the tab's [`PolicyStore`], asks the [`PageInspector`] for the
//! page's policy, applies the user's toggles, and mirrors the store to the
//! background process after every change so header rewriting stays in sync.
//!
//! Errors the user should see (unknown feature, inspector failures) go through
//! one [`ErrorDisplay`]; a new error replaces the previous one. Channel loss is
//! only logged: the background rebuilds its state from the next `init`.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::channel::{ChannelMessage, PanelPort};
use crate::config::PanelConfig;
use crate::inspector::{InspectorError, PageInspector, PageReloader};
use crate::navigation::{NavigationAction, NavigationReconciler};
use crate::policy::{FeatureName, PolicyError, PolicyRecord, PolicyStore};
use crate::registry::TabId;

/// Message shown when the page cannot report its feature policy at all.
pub const POLICY_API_UNAVAILABLE: &str = "This panel requires the Feature Policy JS API \
     (document.featurePolicy). Turn on experimental web platform features in the browser's \
     flags page.";

/// Message shown when evaluating the page's policy fails.
pub const POLICY_EVALUATION_FAILED: &str = "Error getting page's feature policy list";

/// Errors surfaced to the panel user.
#[derive(Debug, Error)]
pub enum PanelError {
    /// A toggle named a feature the page and browser do not know.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// The page inspector failed.
    #[error(transparent)]
    Inspector(#[from] InspectorError),
}

/// Holds the single user-visible error message.
#[derive(Debug, Clone, Default)]
pub struct ErrorDisplay {
    current: Option<String>,
}

impl ErrorDisplay {
    /// Show a message, replacing any shown before.
    pub fn display(&mut self, message: impl Into<String>) {
        self.current = Some(message.into());
    }

    /// Hide the message.
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// The message currently shown.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

/// Controller behind one developer-tools panel.
pub struct Panel {
    tab_id: TabId,
    port: PanelPort,
    inspector: Arc<dyn PageInspector>,
    reloader: Arc<dyn PageReloader>,
    store: PolicyStore,
    navigation: NavigationReconciler,
    errors: ErrorDisplay,
}

impl fmt::Debug for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Panel")
            .field("tab_id", &self.tab_id)
            .field("port", &self.port)
            .field("store", &self.store)
            .field("navigation", &self.navigation)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl Panel {
    /// Create a panel for a tab.
    pub fn new(
        tab_id: TabId,
        port: PanelPort,
        inspector: Arc<dyn PageInspector>,
        reloader: Arc<dyn PageReloader>,
        config: &PanelConfig,
    ) -> Self {
        Self {
            tab_id,
            port,
            inspector,
            reloader,
            store: PolicyStore::new(),
            navigation: NavigationReconciler::new(config.persist_across_reload),
            errors: ErrorDisplay::default(),
        }
    }

    /// Open a session for the tab and load the page's policy.
    pub async fn start(&mut self, url: &str) {
        if let Err(e) = self
            .port
            .send(ChannelMessage::Init {
                tab_id: self.tab_id,
            })
            .await
        {
            tracing::warn!(tab_id = %self.tab_id, error = %e, "failed to announce panel");
        }
        self.navigation.start(url);

        match self.inspector.list_supported_features().await {
            Ok(features) => self.store.set_supported_features(features),
            Err(e) => {
                tracing::warn!(tab_id = %self.tab_id, error = %e, "cannot list supported features");
                self.errors.display(POLICY_API_UNAVAILABLE);
                return;
            }
        }

        self.refresh_policies().await;
    }

    /// Read the page's policy into the original set.
    ///
    /// Only features missing from the original set are taken. Once captured,
    /// the page's declaration stays until navigation resets it: after an
    /// override reload the page evaluates the rewritten header, not its own.
    /// Skipped while a reload is pending. On failure the previous original set
    /// is kept and the error displayed.
    pub async fn refresh_policies(&mut self) {
        if !self.navigation.fetch_allowed() {
            tracing::debug!(tab_id = %self.tab_id, "reload pending, not fetching policies");
            return;
        }

        let features: Vec<FeatureName> = self.store.supported_features().cloned().collect();
        let evaluation = self.inspector.evaluate_policy(&features).await;
        self.errors.clear();

        match evaluation {
            Ok(evaluated) => {
                self.store.fill_original_policies(
                    evaluated
                        .into_iter()
                        .map(|(feature, evaluation)| evaluation.into_record(feature)),
                );
                self.sync().await;
            }
            Err(e) => {
                tracing::warn!(tab_id = %self.tab_id, error = %e, "policy evaluation failed");
                self.errors.display(POLICY_EVALUATION_FAILED);
            }
        }
    }

    /// Flip a feature and reload the page so the new header applies.
    pub async fn toggle(&mut self, feature: &str) {
        let outcome = self.store.toggle(feature).map(|_| ());
        self.apply(outcome.map_err(PanelError::from)).await;
    }

    /// Force a feature on or off and reload the page.
    pub async fn set_override(&mut self, feature: &str, allowed: bool) {
        let outcome = self.store.set_override(feature, allowed).map(|_| ());
        self.apply(outcome.map_err(PanelError::from)).await;
    }

    /// Drop all overrides and reload the page.
    pub async fn restore(&mut self) {
        self.store.restore();
        self.apply(Ok(())).await;
    }

    /// React to the inspected page navigating.
    pub async fn on_navigated(&mut self, url: &str) {
        match self.navigation.on_navigated(url, &mut self.store) {
            NavigationAction::Reload => {
                self.sync().await;
                self.reloader.reload();
            }
            NavigationAction::Refetch => self.refresh_policies().await,
        }
    }

    /// Change whether overrides survive navigation to another URL.
    pub fn set_persist_across_reload(&mut self, persist: bool) {
        self.navigation.set_persist_across_reload(persist);
    }

    /// Rows for the policy table: the effective policy, sorted by feature.
    pub fn rows(&self) -> Vec<PolicyRecord> {
        self.store.effective().into_values().collect()
    }

    /// The panel's store.
    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// The navigation state machine.
    pub fn navigation(&self) -> &NavigationReconciler {
        &self.navigation
    }

    /// The error currently displayed, if any.
    pub fn error(&self) -> Option<&str> {
        self.errors.current()
    }

    /// Close the connection to the background process.
    pub fn close(self) {
        self.port.disconnect();
    }

    async fn apply(&mut self, outcome: Result<(), PanelError>) {
        match outcome {
            Ok(()) => {
                self.errors.clear();
                self.sync().await;
                self.reloader.reload();
            }
            Err(e) => {
                tracing::warn!(tab_id = %self.tab_id, error = %e, "policy change rejected");
                self.errors.display(e.to_string());
            }
        }
    }

    async fn sync(&self) {
        let message = ChannelMessage::Policies {
            tab_id: self.tab_id,
            url: self.navigation.last_known_url().map(str::to_string),
            store: self.store.clone(),
        };
        if let Err(e) = self.port.send(message).await {
            tracing::warn!(tab_id = %self.tab_id, error = %e, "failed to send policies");
        }
    }
}
