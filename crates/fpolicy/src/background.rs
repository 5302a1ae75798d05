//! The background process: session registry plus header hook.
//!
//! All work runs on one task, so channel messages, disconnects and header
//! callbacks are processed strictly one after another and never observe a
//! half-updated registry.
//!
//! Disconnects have their own unbounded queue, polled ahead of the event
//! queue. A dropped port can always report itself, and a response arriving
//! after the disconnect never sees the stale session. Messages still queued
//! from a closed channel are discarded.
//!
//! ```text
//! Panel ──PanelPort──┐──> mpsc<BackgroundEvent> ──┐
//! Panel ──PanelPort──┤──> unbounded<ChannelId> ───┼──> Background::run
//! Network layer ─────┘   (HeadersReceived replies on a oneshot)
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::{ChannelError, ChannelId, ChannelMessage, PanelPort};
use crate::config::BackgroundConfig;
use crate::registry::TabRegistry;
use crate::rewriter::{self, BlockingResponse, HeadersReceivedDetails};

/// Work items for the background event loop.
#[derive(Debug)]
pub enum BackgroundEvent {
    /// A panel sent a message.
    Message {
        /// The sending panel.
        channel: ChannelId,
        /// The message.
        message: ChannelMessage,
    },
    /// Main-frame response headers arrived and wait for a verdict.
    HeadersReceived {
        /// Request details from the network layer.
        details: HeadersReceivedDetails,
        /// Where to send the replacement headers (`None` = unchanged).
        reply: oneshot::Sender<Option<BlockingResponse>>,
    },
}

/// Background process state.
#[derive(Debug, Default)]
pub struct Background {
    registry: TabRegistry,
    closed: HashSet<ChannelId>,
}

impl Background {
    /// Create a background process with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// The session registry.
    pub fn registry(&self) -> &TabRegistry {
        &self.registry
    }

    /// Handle a message from a panel.
    ///
    /// Messages from a channel that already disconnected are dropped.
    pub fn handle_message(&mut self, channel: ChannelId, message: ChannelMessage) {
        if self.closed.contains(&channel) {
            tracing::debug!(channel = %channel, "ignoring message from closed channel");
            return;
        }
        match message {
            ChannelMessage::Init { tab_id } => self.registry.register(tab_id, channel),
            ChannelMessage::Policies { tab_id, url, store } => {
                let owner = self.registry.lookup(tab_id).map(|session| session.channel());
                if owner.is_some_and(|owner| owner != channel) {
                    tracing::debug!(
                        tab_id = %tab_id,
                        channel = %channel,
                        "ignoring policies from channel that does not own the session"
                    );
                    return;
                }
                self.registry.attach_store(tab_id, store, url);
            }
        }
    }

    /// Drop the session owned by a disconnected panel.
    pub fn disconnect(&mut self, channel: ChannelId) {
        self.closed.insert(channel);
        match self.registry.unregister(channel) {
            Some(tab_id) => tracing::info!(tab_id = %tab_id, channel = %channel, "panel disconnected"),
            None => tracing::debug!(channel = %channel, "disconnect for channel without session"),
        }
    }

    /// Header hook. Never suspends.
    pub fn on_headers_received(&self, details: &HeadersReceivedDetails) -> Option<BlockingResponse> {
        rewriter::on_headers_received(&self.registry, details)
    }

    /// Process one event.
    pub fn handle_event(&mut self, event: BackgroundEvent) {
        match event {
            BackgroundEvent::Message { channel, message } => self.handle_message(channel, message),
            BackgroundEvent::HeadersReceived { details, reply } => {
                let response = self.on_headers_received(&details);
                if reply.send(response).is_err() {
                    tracing::debug!(tab_id = %details.tab_id, "header hook caller went away");
                }
            }
        }
    }

    /// Process events until every event sender is gone.
    ///
    /// Pending disconnects are always handled before the next event.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<BackgroundEvent>,
        mut disconnects: mpsc::UnboundedReceiver<ChannelId>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(channel) = disconnects.recv() => self.disconnect(channel),
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        tracing::debug!("background event loop finished");
    }

    /// Run the event loop on a new task.
    pub fn spawn(self, config: &BackgroundConfig) -> (BackgroundHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx, disconnect_rx));
        (BackgroundHandle::new(tx, disconnect_tx), task)
    }
}

/// Cloneable entry point into a running background process.
#[derive(Clone, Debug)]
pub struct BackgroundHandle {
    events: mpsc::Sender<BackgroundEvent>,
    disconnects: mpsc::UnboundedSender<ChannelId>,
    next_channel: Arc<AtomicU64>,
}

impl BackgroundHandle {
    /// Create the first handle of a background process.
    ///
    /// Clones share the channel counter. A second handle built here would hand
    /// out colliding channel ids, so only [`Background::spawn`] calls this.
    pub(crate) fn new(
        events: mpsc::Sender<BackgroundEvent>,
        disconnects: mpsc::UnboundedSender<ChannelId>,
    ) -> Self {
        Self {
            events,
            disconnects,
            next_channel: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a new panel connection.
    ///
    /// The connection has no session until the panel sends `init`.
    pub fn connect(&self) -> PanelPort {
        let id = ChannelId::new(self.next_channel.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(channel = %id, "panel connected");
        PanelPort::new(id, self.events.clone(), self.disconnects.clone())
    }

    /// Ask the background process what to do with a response's headers.
    pub async fn headers_received(
        &self,
        details: HeadersReceivedDetails,
    ) -> Result<Option<BlockingResponse>, ChannelError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(BackgroundEvent::HeadersReceived { details, reply })
            .await
            .map_err(|_| ChannelError::Closed)?;
        response.await.map_err(|_| ChannelError::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::policy::{AllowList, PolicyRecord, PolicyStore};
    use crate::registry::TabId;
    use crate::rewriter::{HttpHeader, MAIN_FRAME_ID};

    fn usb_off() -> PolicyStore {
        let mut store = PolicyStore::new();
        store.set_original_policies([PolicyRecord::declared("usb", AllowList::all())]);
        store.toggle("usb").unwrap();
        store
    }

    #[test]
    fn test_policies_from_foreign_channel_ignored() {
        let mut background = Background::new();
        let tab_id = TabId::new(1);
        background.handle_message(ChannelId::new(1), ChannelMessage::Init { tab_id });

        background.handle_message(
            ChannelId::new(2),
            ChannelMessage::Policies {
                tab_id,
                url: None,
                store: usb_off(),
            },
        );

        assert!(background.registry().lookup(tab_id).unwrap().store().is_none());
    }

    #[test]
    fn test_disconnect_fails_open() {
        let mut background = Background::new();
        let tab_id = TabId::new(1);
        let channel = ChannelId::new(1);
        background.handle_message(channel, ChannelMessage::Init { tab_id });
        background.handle_message(
            channel,
            ChannelMessage::Policies {
                tab_id,
                url: None,
                store: usb_off(),
            },
        );

        let details = HeadersReceivedDetails {
            tab_id,
            frame_id: MAIN_FRAME_ID,
            response_headers: vec![HttpHeader::new("Feature-Policy", "usb *")],
        };
        assert!(background.on_headers_received(&details).is_some());

        background.disconnect(channel);
        assert_eq!(background.on_headers_received(&details), None);
    }

    #[tokio::test]
    async fn test_spawned_loop_replies() {
        let (handle, task) = Background::new().spawn(&BackgroundConfig::default());
        let port = handle.connect();
        port.send(ChannelMessage::Init {
            tab_id: TabId::new(4),
        })
        .await
        .unwrap();

        let response = handle
            .headers_received(HeadersReceivedDetails {
                tab_id: TabId::new(4),
                frame_id: MAIN_FRAME_ID,
                response_headers: vec![HttpHeader::new("Feature-Policy", "b *; a *")],
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.response_headers[0].value, "a *; b *");

        port.disconnect();
        drop(handle);
        task.await.unwrap();
    }

    #[test]
    fn test_connect_allocates_distinct_channels() {
        let (tx, _rx) = mpsc::channel(4);
        let (dtx, _drx) = mpsc::unbounded_channel();
        let handle = BackgroundHandle::new(tx, dtx);
        let first = handle.connect();
        let second = handle.clone().connect();
        assert_ne!(first.id(), second.id());
    }

    fn drain(
        background: &mut Background,
        events: &mut mpsc::Receiver<BackgroundEvent>,
        disconnects: &mut mpsc::UnboundedReceiver<ChannelId>,
        disconnects_first: bool,
    ) {
        if disconnects_first {
            while let Ok(channel) = disconnects.try_recv() {
                background.disconnect(channel);
            }
        }
        while let Ok(event) = events.try_recv() {
            background.handle_event(event);
        }
        while let Ok(channel) = disconnects.try_recv() {
            background.disconnect(channel);
        }
    }

    #[tokio::test]
    async fn test_port_dropped_on_full_queue_releases_session() {
        for disconnects_first in [false, true] {
            let (tx, mut events) = mpsc::channel(1);
            let (dtx, mut disconnects) = mpsc::unbounded_channel();
            let handle = BackgroundHandle::new(tx, dtx);
            let port = handle.connect();
            port.send(ChannelMessage::Init {
                tab_id: TabId::new(1),
            })
            .await
            .unwrap();

            // The event queue is full when the port goes away
            drop(port);

            let mut background = Background::new();
            drain(&mut background, &mut events, &mut disconnects, disconnects_first);
            assert!(background.registry().is_empty());
        }
    }

    #[tokio::test]
    async fn test_disconnect_precedes_later_headers() {
        let (handle, task) = Background::new().spawn(&BackgroundConfig { event_buffer: 1 });
        let port = handle.connect();
        port.send(ChannelMessage::Init {
            tab_id: TabId::new(2),
        })
        .await
        .unwrap();
        port.send(ChannelMessage::Policies {
            tab_id: TabId::new(2),
            url: None,
            store: usb_off(),
        })
        .await
        .unwrap();

        drop(port);

        let response = handle
            .headers_received(HeadersReceivedDetails {
                tab_id: TabId::new(2),
                frame_id: MAIN_FRAME_ID,
                response_headers: vec![HttpHeader::new("Feature-Policy", "usb *")],
            })
            .await
            .unwrap();
        assert_eq!(response, None);

        drop(handle);
        task.await.unwrap();
    }
}
