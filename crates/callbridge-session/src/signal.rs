//! The "stream started" latch between the inbound receiver and the tasks
//! that need the stream identifier.

use tokio::sync::watch;

/// What the telephony `start` message told us about the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: Option<String>,
    pub custom_parameters: serde_json::Map<String, serde_json::Value>,
}

/// Resolving side, owned by the inbound receiver. Dropping it unresolved
/// tells every waiter the stream will never start.
#[derive(Debug)]
pub struct StreamStartLatch {
    tx: watch::Sender<Option<StreamStart>>,
}

/// Waiting side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StreamStartWaiter {
    rx: watch::Receiver<Option<StreamStart>>,
}

pub fn stream_start_latch() -> (StreamStartLatch, StreamStartWaiter) {
    let (tx, rx) = watch::channel(None);
    (StreamStartLatch { tx }, StreamStartWaiter { rx })
}

impl StreamStartLatch {
    /// Resolve once. Later calls are ignored and return `false`.
    pub fn resolve(&self, start: StreamStart) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(start);
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl StreamStartWaiter {
    /// Wait for the stream to start; `None` if the latch was dropped first.
    pub async fn wait(&mut self) -> Option<StreamStart> {
        match self.rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        }
    }

    pub fn current(&self) -> Option<StreamStart> {
        self.rx.borrow().clone()
    }

    pub fn stream_sid(&self) -> Option<String> {
        self.rx.borrow().as_ref().map(|s| s.stream_sid.clone())
    }
}
