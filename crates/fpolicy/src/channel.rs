//! Panel to background message channel.
//!
//! Each developer-tools panel holds a [`PanelPort`] connected to the background
//! process. Messages are delivered in order, at most once; a message sent after
//! the background has gone away is lost, and the panel recovers by sending a
//! fresh `init` on its next connection.
//!
//! # Protocol
//!
//! ```text
//! {"name": "init", "tabId": 12}
//! {"name": "policies", "tabId": 12, "url": "https://a.test/", "store": {...}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::background::BackgroundEvent;
use crate::policy::PolicyStore;
use crate::registry::TabId;

/// Errors from the panel side of the channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The background process is no longer receiving messages.
    #[error("background channel closed")]
    Closed,
}

/// Identity of one panel connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Wrap a raw channel id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Messages sent from a panel to the background process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum ChannelMessage {
    /// Announce which tab this channel inspects; starts a session.
    Init {
        /// The inspected tab.
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    /// Snapshot of the panel's policy store for header rewriting.
    Policies {
        /// The inspected tab.
        #[serde(rename = "tabId")]
        tab_id: TabId,
        /// Page URL the snapshot belongs to.
        #[serde(default)]
        url: Option<String>,
        /// Current original and override sets.
        store: PolicyStore,
    },
}

/// Panel end of a connection to the background process.
///
/// Messages share the bounded event queue. Disconnects travel on a separate
/// unbounded queue so dropping a port never loses one, even when the event
/// queue is full. Dropping the port disconnects it, which removes the tab's
/// session.
pub struct PanelPort {
    id: ChannelId,
    events: mpsc::Sender<BackgroundEvent>,
    disconnects: mpsc::UnboundedSender<ChannelId>,
    connected: bool,
}

impl fmt::Debug for PanelPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelPort")
            .field("id", &self.id)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl PanelPort {
    pub(crate) fn new(
        id: ChannelId,
        events: mpsc::Sender<BackgroundEvent>,
        disconnects: mpsc::UnboundedSender<ChannelId>,
    ) -> Self {
        Self {
            id,
            events,
            disconnects,
            connected: true,
        }
    }

    /// This connection's id.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Send a message to the background process.
    pub async fn send(&self, message: ChannelMessage) -> Result<(), ChannelError> {
        self.events
            .send(BackgroundEvent::Message {
                channel: self.id,
                message,
            })
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Close the connection.
    pub fn disconnect(mut self) {
        self.notify_disconnect();
    }

    fn notify_disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if self.disconnects.send(self.id).is_err() {
            tracing::debug!(channel = %self.id, "background already gone on disconnect");
        }
    }
}

impl Drop for PanelPort {
    fn drop(&mut self) {
        self.notify_disconnect();
    }
}
