//! Session lifecycle state machine.
//!
//! ```text
//! Idle ──► Connecting ──► Ready ──► Closed(Normal | Abrupt)
//!               │            │
//!               └────────────┴────► Failed
//! ```
//!
//! Terminal states are absorbing. The current state lives in a
//! [`watch`] channel, so an observer that subscribes after the session ended
//! still sees the recorded outcome.

use std::sync::Arc;

use tokio::sync::watch;

use crate::core::SessionError;
use crate::core::StreamIoError;
use crate::transport::CloseOutcome;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet connecting.
    Idle,
    /// Waiting for the transport to report readiness.
    Connecting,
    /// Established; streams and datagrams may be used.
    Ready,
    /// Closed, normally or abruptly.
    Closed(CloseOutcome),
    /// Never became ready, or lost without a close outcome.
    Failed,
}

impl SessionState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed(_) | SessionState::Failed)
    }

    /// Close outcome reported to lifecycle observers.
    ///
    /// `Failed` is reported as abrupt; non-terminal states have no outcome.
    pub fn outcome(&self) -> Option<CloseOutcome> {
        match self {
            SessionState::Closed(outcome) => Some(*outcome),
            SessionState::Failed => Some(CloseOutcome::Abrupt),
            _ => None,
        }
    }

    /// Error surfaced to a stream read interrupted by this terminal state.
    pub(crate) fn stream_error(&self) -> StreamIoError {
        match self {
            SessionState::Closed(CloseOutcome::Normal) => StreamIoError::SessionClosed,
            _ => StreamIoError::ConnectionLost,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Closed(CloseOutcome::Normal) => f.write_str("closed"),
            SessionState::Closed(CloseOutcome::Abrupt) => f.write_str("closed abruptly"),
            SessionState::Failed => f.write_str("failed"),
        }
    }
}

/// Owner side of the lifecycle.
#[derive(Debug, Clone)]
pub(crate) struct Lifecycle {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Move to `next`. Returns `false` if already terminal or already in `next`.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        })
    }

    pub(crate) fn watch(&self) -> LifecycleWatch {
        LifecycleWatch {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of the lifecycle, held by every loop bound to the session.
#[derive(Debug, Clone)]
pub struct LifecycleWatch {
    rx: watch::Receiver<SessionState>,
}

impl LifecycleWatch {
    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.rx.borrow()
    }

    /// Whether the session already reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.rx.borrow().is_terminal()
    }

    /// Fail with [`SessionError::SessionClosed`] once terminal.
    pub fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_terminal() {
            return Err(SessionError::SessionClosed);
        }
        Ok(())
    }

    /// Resolve with the terminal state, immediately if already reached.
    ///
    /// Cancel safe; meant to be one branch of a `select!`.
    pub async fn terminated(&mut self) -> SessionState {
        match self.rx.wait_for(SessionState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => SessionState::Failed,
        }
    }

    /// Resolve with the close outcome.
    pub async fn closed(mut self) -> CloseOutcome {
        self.terminated()
            .await
            .outcome()
            .unwrap_or(CloseOutcome::Abrupt)
    }
}
