//! Scripted AI backend for session tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use callbridge_providers::{ClientMessage, LiveConnection, LiveEvent, LiveSender, LiveSetup, RealtimeBackend};

type Respond = dyn Fn(&ClientMessage) -> Vec<LiveEvent> + Send + Sync;
type Injector = Arc<Mutex<Option<mpsc::UnboundedSender<LiveEvent>>>>;

/// Answers each client message with the events `respond` returns and
/// records everything it was sent.
pub struct ScriptedBackend {
    respond: Arc<Respond>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    setups: Arc<Mutex<Vec<LiveSetup>>>,
    connects: Arc<AtomicUsize>,
    fail: bool,
    close_after: Option<usize>,
    reject_input: bool,
    injector: Injector,
}

impl ScriptedBackend {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&ClientMessage) -> Vec<LiveEvent> + Send + Sync + 'static,
    {
        Self {
            respond: Arc::new(respond),
            sent: Arc::default(),
            setups: Arc::default(),
            connects: Arc::default(),
            fail: false,
            close_after: None,
            reject_input: false,
            injector: Arc::default(),
        }
    }

    /// Every connect attempt is refused.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(|_| Vec::new())
        }
    }

    /// End the event stream after `messages` client messages.
    pub fn closing_after(mut self, messages: usize) -> Self {
        self.close_after = Some(messages);
        self
    }

    /// Refuse every client message while leaving the event stream open;
    /// events are pushed through [`ScriptedBackend::injector`].
    pub fn rejecting_input(mut self) -> Self {
        self.reject_input = true;
        self
    }

    pub fn injector(&self) -> Injector {
        self.injector.clone()
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<ClientMessage>>> {
        self.sent.clone()
    }

    pub fn setups(&self) -> Arc<Mutex<Vec<LiveSetup>>> {
        self.setups.clone()
    }

    pub fn connects(&self) -> Arc<AtomicUsize> {
        self.connects.clone()
    }
}

#[async_trait]
impl RealtimeBackend for ScriptedBackend {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn connect(&self, setup: &LiveSetup) -> anyhow::Result<LiveConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("connection refused");
        }
        self.setups.lock().unwrap().push(setup.clone());

        let (client_tx, mut client_rx) = mpsc::channel::<ClientMessage>(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<LiveEvent>();
        if self.reject_input {
            drop(client_rx);
            *self.injector.lock().unwrap() = Some(event_tx);
            return Ok(LiveConnection {
                sender: LiveSender::new(client_tx),
                events: UnboundedReceiverStream::new(event_rx).map(Ok).boxed(),
            });
        }
        let respond = self.respond.clone();
        let sent = self.sent.clone();
        let close_after = self.close_after;

        tokio::spawn(async move {
            let mut handled = 0usize;
            while let Some(message) = client_rx.recv().await {
                let events = respond(&message);
                sent.lock().unwrap().push(message);
                for event in events {
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
                handled += 1;
                if close_after.is_some_and(|n| handled >= n) {
                    return;
                }
            }
        });

        Ok(LiveConnection {
            sender: LiveSender::new(client_tx),
            events: UnboundedReceiverStream::new(event_rx).map(Ok).boxed(),
        })
    }
}
