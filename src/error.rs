//! Error types for the relink engine.

use std::fmt;
use thiserror::Error;

/// Result type for relink operations.
pub type Result<T> = std::result::Result<T, RelinkError>;

/// Errors produced by the engine and session layer.
#[derive(Error, Debug)]
pub enum RelinkError {
    /// I/O failure reported by the raw-send callback.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed or unexpected segment; non-fatal, segment is dropped.
    #[error("malformed segment: {message}")]
    Malformed { message: String },

    /// A message exceeds what fragmentation can carry; non-fatal, rejected.
    #[error("oversized message: {size} bytes exceeds limit of {max}")]
    Oversized { size: usize, max: usize },

    /// A segment exhausted its retransmit budget; fatal to the session.
    #[error("dead link: segment exceeded maximum retransmit attempts")]
    DeadLink,

    /// The inactivity timer expired; fatal to the session.
    #[error("connection timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u32 },

    /// Operation on a session that is not in a state to accept it.
    #[error("session error: {message}")]
    Session { message: String },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl RelinkError {
    /// Create a malformed-segment error.
    pub fn malformed(message: impl Into<String>) -> Self {
        RelinkError::Malformed {
            message: message.into(),
        }
    }

    /// Create a session error.
    pub fn session(message: impl Into<String>) -> Self {
        RelinkError::Session {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        RelinkError::Config {
            message: message.into(),
        }
    }

    /// Check if this error terminates the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelinkError::DeadLink | RelinkError::Timeout { .. } | RelinkError::Transport(_)
        )
    }
}

/// Error classification surfaced through the error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Hostname resolution failed before a session existed.
    ResolutionFailure,
    /// Inactivity timer expired.
    Timeout,
    /// A segment exceeded the maximum retransmit attempts.
    DeadLink,
    /// Decode failure or conversation-id mismatch; the segment was dropped.
    MalformedSegment,
    /// A send request exceeded the fragmentation limits; it was rejected.
    OversizedMessage,
    /// The underlying transport signaled a failure.
    TransportFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ResolutionFailure => write!(f, "resolution failure"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::DeadLink => write!(f, "dead link"),
            ErrorKind::MalformedSegment => write!(f, "malformed segment"),
            ErrorKind::OversizedMessage => write!(f, "oversized message"),
            ErrorKind::TransportFailure => write!(f, "transport failure"),
        }
    }
}
