//! Error types for the port substrate.

use std::panic::Location;
use thiserror::Error;

/// Where a call originated, captured before any async hop so failures
/// stay debuggable across the context boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOrigin {
    pub file: &'static str,
    pub line: u32,
}

impl CallOrigin {
    /// Capture the caller's location.
    #[track_caller]
    pub fn capture() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl std::fmt::Display for CallOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// All possible errors from the port substrate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortError {
    /// The remote handler failed; the origin of the local call is
    /// spliced on for diagnostics
    #[error("remote call failed: {message} (called from {origin})")]
    Remote {
        message: String,
        kind: Option<String>,
        origin: CallOrigin,
    },

    /// The target's lease became acquirable while calls were pending
    #[error("target disconnected (called from {origin})")]
    Disconnected { origin: CallOrigin },

    /// The underlying channel is gone
    #[error("channel closed")]
    Closed,

    /// No handler registered under the requested name
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A frame could not be decoded
    #[error("malformed frame: {0}")]
    Codec(String),

    /// No worker is hosted under the requested name
    #[error("no worker registered under '{0}'")]
    UnknownWorker(String),
}

/// Result type for port operations.
pub type Result<T> = std::result::Result<T, PortError>;
