//! Session lifecycle states

use std::fmt;
use std::sync::Arc;

use crate::StreamError;

/// Lifecycle state of a session.
///
/// ```text
/// Idle -> Connecting -> Streaming -> Closing -> Closed
///             ^  |          |
///             |  v          v
///         Reconnecting <----+          (any) -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    /// Waiting out the backoff delay before the next connect attempt
    Reconnecting,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// Whether a receive loop owns the session in this state.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Streaming
                | SessionState::Reconnecting
                | SessionState::Closing
        )
    }

    /// Whether the receive loop has exited.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a receive loop ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// `disconnect()` was called
    Closed,
    /// An unrecoverable error ended the session
    Failed(Arc<StreamError>),
}

impl SessionOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, SessionOutcome::Closed)
    }

    pub fn error(&self) -> Option<&StreamError> {
        match self {
            SessionOutcome::Closed => None,
            SessionOutcome::Failed(error) => Some(error),
        }
    }
}
