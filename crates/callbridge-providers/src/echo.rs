//! Offline loopback backend.
//!
//! Every audio chunk comes straight back, resampled from the input rate to
//! the output rate. The end of the audio stream completes the turn. Tool
//! responses are acknowledged with a text event. Used for local testing
//! without a Gemini key.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use callbridge_media::codec::{pcm_from_bytes, pcm_to_bytes};
use callbridge_media::resample::{ResampleState, resample};

use crate::{ClientMessage, LiveConnection, LiveEvent, LiveSender, LiveSetup, RealtimeBackend};

#[derive(Debug, Default, Clone)]
pub struct EchoBackend;

impl EchoBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RealtimeBackend for EchoBackend {
    fn id(&self) -> &str {
        "echo"
    }

    async fn connect(&self, setup: &LiveSetup) -> anyhow::Result<LiveConnection> {
        let (client_tx, mut client_rx) = mpsc::channel::<ClientMessage>(64);
        let (event_tx, event_rx) = mpsc::channel::<anyhow::Result<LiveEvent>>(64);
        let from_rate = setup.input_format.sample_rate;
        let to_rate = setup.output_format.sample_rate;

        tokio::spawn(async move {
            let mut state = ResampleState::default();
            while let Some(message) = client_rx.recv().await {
                let event = match message {
                    ClientMessage::Audio { data, .. } => {
                        let (echoed, next) =
                            resample(&pcm_from_bytes(&data), from_rate, to_rate, state);
                        state = next;
                        LiveEvent::Audio(pcm_to_bytes(&echoed))
                    }
                    ClientMessage::AudioStreamEnd => LiveEvent::TurnComplete,
                    ClientMessage::ToolResponse(results) => {
                        LiveEvent::Text(format!("received {} tool result(s)", results.len()))
                    }
                };
                if event_tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
            debug!("Echo backend session finished");
        });

        Ok(LiveConnection {
            sender: LiveSender::new(client_tx),
            events: ReceiverStream::new(event_rx).boxed(),
        })
    }
}
