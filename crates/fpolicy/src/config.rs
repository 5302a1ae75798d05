//! Configuration for the panel and background process.

use serde::{Deserialize, Serialize};

/// Options of a developer-tools panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Keep overrides when the inspected page navigates to a different URL.
    #[serde(default)]
    pub persist_across_reload: bool,
}

/// Options of the background process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Capacity of the event queue shared by all panels and the header hook.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    32
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}
