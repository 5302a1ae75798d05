//! Registry of active tab sessions in the background process.
//!
//! A session exists while a developer-tools panel for that tab is connected.
//! The registry is owned by the background event loop, which dispatches every
//! mutation and every header callback serially, so it is a plain map.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;
use crate::policy::{PolicyRecord, PolicyStore};

/// Browser tab identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(i64);

impl TabId {
    /// Wrap a raw tab id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw tab id.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Override state of one inspected tab, as seen by the background process.
#[derive(Debug)]
pub struct TabSession {
    tab_id: TabId,
    channel: ChannelId,
    store: Option<PolicyStore>,
    last_known_url: Option<String>,
}

impl TabSession {
    fn new(tab_id: TabId, channel: ChannelId) -> Self {
        Self {
            tab_id,
            channel,
            store: None,
            last_known_url: None,
        }
    }

    /// The inspected tab.
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// The panel channel that owns this session.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// The store mirrored from the panel, if it has been sent yet.
    pub fn store(&self) -> Option<&PolicyStore> {
        self.store.as_ref()
    }

    /// The last page URL the panel reported.
    pub fn last_known_url(&self) -> Option<&str> {
        self.last_known_url.as_deref()
    }

    /// Overrides to apply to the tab's main-frame headers.
    pub fn header_overrides(&self) -> impl Iterator<Item = &PolicyRecord> {
        self.store.iter().flat_map(PolicyStore::header_overrides)
    }
}

/// Table of active sessions keyed by tab.
///
/// Invariants: at most one session per tab, and each channel owns at most one
/// session.
#[derive(Debug, Default)]
pub struct TabRegistry {
    sessions: HashMap<TabId, TabSession>,
}

impl TabRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for a tab, replacing any existing one.
    ///
    /// A channel re-announcing itself for a different tab gives up its
    /// previous session.
    pub fn register(&mut self, tab_id: TabId, channel: ChannelId) {
        if let Some(previous) = self.unregister(channel)
            && previous != tab_id
        {
            tracing::debug!(tab_id = %previous, channel = %channel, "channel moved to another tab");
        }

        if let Some(replaced) = self.sessions.insert(tab_id, TabSession::new(tab_id, channel)) {
            tracing::info!(
                tab_id = %tab_id,
                old_channel = %replaced.channel,
                new_channel = %channel,
                "replaced tab session"
            );
        } else {
            tracing::info!(tab_id = %tab_id, channel = %channel, "registered tab session");
        }
    }

    /// Attach the panel's store to a session.
    ///
    /// Does nothing when the tab has no session; the panel may race its own
    /// connect or disconnect.
    pub fn attach_store(&mut self, tab_id: TabId, store: PolicyStore, url: Option<String>) {
        match self.sessions.get_mut(&tab_id) {
            Some(session) => {
                session.store = Some(store);
                if url.is_some() {
                    session.last_known_url = url;
                }
            }
            None => {
                tracing::debug!(tab_id = %tab_id, "dropping store for tab without session");
            }
        }
    }

    /// The session for a tab, if one is active.
    pub fn lookup(&self, tab_id: TabId) -> Option<&TabSession> {
        self.sessions.get(&tab_id)
    }

    /// Remove the session owned by a channel, returning its tab.
    pub fn unregister(&mut self, channel: ChannelId) -> Option<TabId> {
        let tab_id = self
            .sessions
            .values()
            .find(|session| session.channel == channel)
            .map(TabSession::tab_id)?;
        self.sessions.remove(&tab_id);
        Some(tab_id)
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no panel is connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
