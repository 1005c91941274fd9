//! Session lifecycle.

use std::fmt;

/// Where a [`Session`](super::Session) is in its life.
///
/// `Unconnected -> Connecting -> Ready -> Closed`, with
/// `Connecting -> Failed` when a hop cannot be opened. A failed session may
/// connect again; a closed one may not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Ready,
    Closed,
    /// The connect attempt failed; carries the error text.
    Failed(String),
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// Whether `connect()` may be called from this state.
    pub fn can_connect(&self) -> bool {
        matches!(self, SessionState::Unconnected | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unconnected => write!(f, "unconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
