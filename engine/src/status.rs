//! Sync status record, broadcast bus, and error-badge derivation.
//!
//! Exactly one status record exists per controller lifetime, re-derived
//! from scratch on every restart. The controller is its sole writer;
//! every other context receives read-only snapshots over the bus.

use crate::hooks::Progress;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Method name carried by every status broadcast.
pub const STATUS_METHOD: &str = "syncStatusUpdate";

/// Lifecycle state of the sync connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Never configured
    #[default]
    Pending,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Process-wide sync status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// A sync pass is currently running
    pub syncing: bool,
    /// Free-form progress of the running pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub current_drive_name: Option<String>,
    pub error_message: Option<String>,
    /// A valid grant is held for the active drive
    pub login: bool,
}

/// Broadcast message observers receive on every status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub method: String,
    pub status: SyncStatus,
}

/// Publishes read-only status snapshots to all interested contexts.
#[derive(Debug, Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<StatusUpdate>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }

    /// Publish a snapshot. Nobody listening is fine.
    pub fn publish(&self, status: SyncStatus) {
        let update = StatusUpdate {
            method: STATUS_METHOD.to_string(),
            status,
        };
        let _ = self.tx.send(update);
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Visible error indicator for the toolbar icon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBadge {
    pub text: String,
    pub color: String,
    pub title: String,
}

/// Derive the visible error indicator.
///
/// Shown only when connected and either logged out or broken by a
/// non-transient error. Network failures stay silent while the
/// connection is otherwise healthy.
pub fn error_badge(status: &SyncStatus, last_error: Option<&Error>) -> Option<ErrorBadge> {
    if status.state != SyncState::Connected {
        return None;
    }
    let broken = !status.login || last_error.is_some_and(|err| !err.is_network());
    if !broken {
        return None;
    }
    let title = if !status.login {
        "please re-login to resume syncing".to_string()
    } else {
        let message = last_error.map(Error::user_message).unwrap_or_default();
        format!("sync error\n---------------------\n{}", wrap_lines(&message))
    };
    Some(ErrorBadge {
        text: "x".to_string(),
        color: "#F00".to_string(),
        title,
    })
}

// Splitting to limit each tooltip line length: break after a word once a
// line passes 60 characters, but never leave a stub shorter than 30.
fn wrap_lines(message: &str) -> String {
    let words: Vec<&str> = message.split_whitespace().collect();
    let mut remaining: usize = words.iter().map(|w| w.len() + 1).sum();
    let mut out = String::new();
    let mut line_len = 0usize;
    for word in words {
        remaining = remaining.saturating_sub(word.len() + 1);
        if line_len >= 60 && remaining >= 30 {
            out.push('\n');
            line_len = 0;
        } else if line_len > 0 {
            out.push(' ');
            line_len += 1;
        }
        out.push_str(word);
        line_len += word.len();
    }
    out
}
