//! Error types for the sync engine.
//!
//! Errors carry enough shape to classify them the way the controller
//! needs: transient network failures are retried and never shown,
//! grant failures demote the login flag, and a remote lock renders its
//! expiry time to the user.

use crate::Revision;
use chrono::{Local, TimeZone};
use thiserror::Error;

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Requested drive name is not registered
    #[error("unknown cloud provider: {0}")]
    UnknownProvider(String),

    /// Access token invalid, expired or revoked
    #[error("token rejected for {drive}: {message}")]
    Token { drive: String, message: String },

    /// Remote side answered with an HTTP error
    #[error("HTTP {code}: {message}")]
    Http { code: u16, message: String },

    /// Connectivity failure before any response arrived
    #[error("network failure: {0}")]
    Network(String),

    /// Another sync session holds the remote lock
    #[error("remote storage is locked until {expire}")]
    RemoteLocked { expire: Revision },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient connectivity failure: retried by the backoff policy and
    /// suppressed from the visible error badge.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_)) || matches!(self, Error::Http { code: 502, .. })
    }

    /// Invalid or expired grant: demotes the login flag so the UI
    /// prompts re-authentication.
    pub fn is_grant(&self) -> bool {
        match self {
            Error::Token { .. } => true,
            Error::Http { code: 401, .. } => true,
            Error::Http { code: 400, message } => message.contains("invalid_grant"),
            _ => false,
        }
    }

    /// User-facing message; the remote-lock error renders its expiry in
    /// local time.
    pub fn user_message(&self) -> String {
        match self {
            Error::RemoteLocked { expire } => {
                let when = Local
                    .timestamp_millis_opt(*expire)
                    .single()
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or_else(|| expire.to_string());
                format!("storage is locked by another sync session until {when}")
            }
            other => other.to_string(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
