use serde::{Deserialize, Serialize};

/// Sample encoding of an audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// G.711 μ-law, one byte per sample.
    Mulaw,
    /// 16-bit signed little-endian linear PCM.
    Linear16,
}

impl AudioEncoding {
    /// Bytes per sample.
    pub fn sample_width(self) -> usize {
        match self {
            Self::Mulaw => 1,
            Self::Linear16 => 2,
        }
    }
}

/// Format tag carried by every [`AudioFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Telephony wire format: μ-law mono.
    pub const fn mulaw(sample_rate: u32) -> Self {
        Self {
            encoding: AudioEncoding::Mulaw,
            sample_rate,
            channels: 1,
        }
    }

    /// Linear 16-bit PCM mono.
    pub const fn linear16(sample_rate: u32) -> Self {
        Self {
            encoding: AudioEncoding::Linear16,
            sample_rate,
            channels: 1,
        }
    }

    /// MIME tag used by streaming AI backends, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        match self.encoding {
            AudioEncoding::Linear16 => format!("audio/pcm;rate={}", self.sample_rate),
            AudioEncoding::Mulaw => "audio/x-mulaw".to_string(),
        }
    }
}

/// One chunk of audio moving through a session queue.
///
/// Frames are never mutated after construction; ownership moves through
/// the queues to their single consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
    format: AudioFormat,
    sequence: u64,
    timestamp_ms: Option<u64>,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>, format: AudioFormat, sequence: u64) -> Self {
        Self {
            data,
            format,
            sequence,
            timestamp_ms: None,
        }
    }

    /// Attach the wire timestamp (milliseconds since stream start).
    pub fn with_timestamp(mut self, timestamp_ms: Option<u64>) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp_ms(&self) -> Option<u64> {
        self.timestamp_ms
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of whole samples in the buffer.
    pub fn sample_count(&self) -> usize {
        self.data.len() / self.format.encoding.sample_width() / self.format.channels.max(1) as usize
    }

    /// Playback duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.format.sample_rate == 0 {
            return 0;
        }
        self.sample_count() as u64 * 1000 / self.format.sample_rate as u64
    }
}

/// A function call requested by the AI backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Backend-assigned id; echoed back in the matching [`ToolCallResult`].
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(serde_json::Value),
    Error(String),
}

/// Result returned to the AI backend for one [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn success(request: &ToolCallRequest, value: serde_json::Value) -> Self {
        Self {
            call_id: request.call_id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Success(value),
        }
    }

    pub fn error(request: &ToolCallRequest, message: impl Into<String>) -> Self {
        Self {
            call_id: request.call_id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    /// Response object sent to the model: `{"result": ...}` or `{"error": "..."}`.
    pub fn response_payload(&self) -> serde_json::Value {
        match &self.outcome {
            ToolOutcome::Success(value) => serde_json::json!({ "result": value }),
            ToolOutcome::Error(message) => serde_json::json!({ "error": message }),
        }
    }
}
