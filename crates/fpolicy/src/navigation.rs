//! Navigation handling for an inspected tab.
//!
//! When the inspected page moves to a different URL its original policy no
//! longer applies, so unless the user asked to keep overrides the store is
//! wiped and the page reloaded. Fetching the page's policy is held back until
//! that reload lands; otherwise a fetch against the old document could race
//! the reload and repopulate stale data.
//!
//! ```text
//!            navigated(other url, no persist)
//!   Idle/Active ─────────────────────────────> PendingReload
//!        ^                                          │
//!        └──────── navigated(same url) ─────────────┘
//! ```

use crate::policy::PolicyStore;

/// Where the tab is in its navigation cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NavigationState {
    /// No navigation seen yet.
    #[default]
    Idle,
    /// State was reset and a reload requested; fetching is suppressed.
    PendingReload,
    /// Policies are current for the page.
    Active,
}

/// What the panel must do after a navigation event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationAction {
    /// Reload the page; the store has been reset.
    Reload,
    /// Fetch the page's policy again.
    Refetch,
}

/// Per-tab navigation state machine.
#[derive(Clone, Debug, Default)]
pub struct NavigationReconciler {
    state: NavigationState,
    last_known_url: Option<String>,
    persist_across_reload: bool,
}

impl NavigationReconciler {
    /// Create a reconciler.
    pub fn new(persist_across_reload: bool) -> Self {
        Self {
            persist_across_reload,
            ..Self::default()
        }
    }

    /// Current state.
    pub fn state(&self) -> NavigationState {
        self.state
    }

    /// The URL of the most recent navigation.
    pub fn last_known_url(&self) -> Option<&str> {
        self.last_known_url.as_deref()
    }

    /// Whether overrides survive navigation to another URL.
    pub fn persist_across_reload(&self) -> bool {
        self.persist_across_reload
    }

    /// Change the persistence option.
    pub fn set_persist_across_reload(&mut self, persist: bool) {
        self.persist_across_reload = persist;
    }

    /// Returns false while a reload is pending.
    pub fn fetch_allowed(&self) -> bool {
        self.state != NavigationState::PendingReload
    }

    /// Record the page the panel opened on.
    pub fn start(&mut self, url: &str) {
        self.last_known_url = Some(url.to_string());
        self.state = NavigationState::Active;
    }

    /// React to the inspected page navigating to `url`.
    pub fn on_navigated(&mut self, url: &str, store: &mut PolicyStore) -> NavigationAction {
        let previous = self.last_known_url.replace(url.to_string());
        let changed = previous.is_some_and(|previous| previous != url);

        if changed && !self.persist_across_reload {
            tracing::debug!(url = %url, "page changed, resetting overrides");
            store.reset();
            self.state = NavigationState::PendingReload;
            NavigationAction::Reload
        } else {
            self.state = NavigationState::Active;
            NavigationAction::Refetch
        }
    }
}
