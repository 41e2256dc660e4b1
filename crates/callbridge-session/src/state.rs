//! Session lifecycle state.

use serde::Serialize;
use tokio::sync::watch;

/// `Accepted → Streaming → Draining → Closed`; transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Transport open, no stream identifier yet.
    Accepted,
    /// `start` received; all three tasks running.
    Streaming,
    /// Inbound ended or the end signal fired; in-flight work may finish.
    Draining,
    /// Transport closed and every task joined.
    Closed,
}

/// Publishes the state of one session on a watch channel.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<SessionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Accepted);
        Self { tx }
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `next` if it is ahead of the current state.
    pub fn advance(&self, next: SessionState) -> bool {
        self.tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}
