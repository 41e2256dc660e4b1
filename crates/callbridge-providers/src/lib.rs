//! Streaming conversational-AI backends.
//!
//! Each backend implements the [`RealtimeBackend`] trait. A connection is a
//! cloneable [`LiveSender`] for client messages plus a stream of
//! [`LiveEvent`]s, so audio forwarding and tool responses can be sent from
//! different tasks without sharing the socket.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use callbridge_core::types::{AudioFormat, ToolCallRequest, ToolCallResult};

pub mod echo;
pub mod gemini_live;

pub use echo::EchoBackend;
pub use gemini_live::GeminiLiveBackend;

/// Fixed configuration sent when a session opens.
#[derive(Debug, Clone)]
pub struct LiveSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Function declarations (`{name, description, parameters}`).
    pub function_declarations: Vec<serde_json::Value>,
    /// Format of audio sent to the backend.
    pub input_format: AudioFormat,
    /// Format of audio the backend returns.
    pub output_format: AudioFormat,
}

/// Messages the client sends after setup.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// One realtime audio chunk.
    Audio { data: Vec<u8>, mime_type: String },
    /// No more audio will follow.
    AudioStreamEnd,
    /// Results for one tool-call batch.
    ToolResponse(Vec<ToolCallResult>),
}

/// Events received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    SetupComplete,
    /// PCM audio at the setup's output format.
    Audio(Vec<u8>),
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
    ToolCallCancellation(Vec<String>),
    Interrupted,
    GenerationComplete,
    TurnComplete,
    /// The backend will close the session soon.
    GoAway { time_left: Option<String> },
    Usage(serde_json::Value),
}

pub type LiveEventStream = BoxStream<'static, anyhow::Result<LiveEvent>>;

/// Cloneable handle for sending [`ClientMessage`]s on one connection.
#[derive(Debug, Clone)]
pub struct LiveSender {
    tx: mpsc::Sender<ClientMessage>,
}

impl LiveSender {
    pub fn new(tx: mpsc::Sender<ClientMessage>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, message: ClientMessage) -> anyhow::Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| anyhow::anyhow!("backend connection closed"))
    }

    pub async fn send_audio(&self, data: Vec<u8>, format: &AudioFormat) -> anyhow::Result<()> {
        self.send(ClientMessage::Audio {
            data,
            mime_type: format.mime_type(),
        })
        .await
    }

    pub async fn audio_stream_end(&self) -> anyhow::Result<()> {
        self.send(ClientMessage::AudioStreamEnd).await
    }

    pub async fn send_tool_responses(&self, results: Vec<ToolCallResult>) -> anyhow::Result<()> {
        self.send(ClientMessage::ToolResponse(results)).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open backend session.
pub struct LiveConnection {
    pub sender: LiveSender,
    pub events: LiveEventStream,
}

/// A streaming speech-to-speech backend.
#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Backend identifier (e.g. "gemini-live", "echo").
    fn id(&self) -> &str;

    /// Open a session and complete the setup handshake.
    async fn connect(&self, setup: &LiveSetup) -> anyhow::Result<LiveConnection>;
}
