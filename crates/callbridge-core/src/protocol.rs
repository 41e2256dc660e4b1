//! Telephony media-stream wire protocol (Twilio Media Streams).
//!
//! Every message is a JSON object with an `event` discriminator. Inbound
//! kinds are `connected`, `start`, `media`, `stop`, `mark` and `dtmf`;
//! outbound messages are `media` and `mark`, addressed by `streamSid`.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallBridgeError, Result};

/// Media format announced in the `start` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: u16,
}

/// Payload of the `start` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
    #[serde(default)]
    pub custom_parameters: serde_json::Map<String, Value>,
}

/// Payload of a `media` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub chunk: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub timestamp: Option<u64>,
    pub payload: String,
}

impl MediaPayload {
    /// Decode the base64 audio bytes.
    pub fn decode_audio(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|e| CallBridgeError::Codec(format!("invalid media payload: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtmfPayload {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub digit: String,
}

/// A parsed inbound telephony message.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyEvent {
    Connected {
        protocol: Option<String>,
    },
    Start {
        sequence: Option<u64>,
        start: StartPayload,
    },
    Media {
        sequence: Option<u64>,
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    Stop {
        sequence: Option<u64>,
    },
    Mark {
        name: String,
    },
    Dtmf {
        digit: String,
    },
    Unknown {
        event: String,
    },
}

impl TelephonyEvent {
    /// Event kind as it appears on the wire.
    pub fn kind(&self) -> &str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Start { .. } => "start",
            Self::Media { .. } => "media",
            Self::Stop { .. } => "stop",
            Self::Mark { .. } => "mark",
            Self::Dtmf { .. } => "dtmf",
            Self::Unknown { event } => event,
        }
    }
}

/// Flat view of any inbound message; nested payloads are checked per kind.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    event: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    sequence_number: Option<u64>,
    #[serde(default)]
    stream_sid: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    start: Option<StartPayload>,
    #[serde(default)]
    media: Option<MediaPayload>,
    #[serde(default)]
    mark: Option<MarkPayload>,
    #[serde(default)]
    dtmf: Option<DtmfPayload>,
}

/// Parse one inbound text frame.
///
/// Fails when the frame is not JSON, has no `event`, or a `start`/`media`
/// message is missing its nested payload.
pub fn parse_event(text: &str) -> Result<TelephonyEvent> {
    let raw: RawEvent = serde_json::from_str(text)?;
    let event = match raw.event.as_str() {
        "connected" => TelephonyEvent::Connected {
            protocol: raw.protocol,
        },
        "start" => {
            let mut start = raw
                .start
                .ok_or_else(|| CallBridgeError::Transport("start event without payload".into()))?;
            // Some senders put the stream id only at the top level.
            if start.stream_sid.is_none() {
                start.stream_sid = raw.stream_sid;
            }
            TelephonyEvent::Start {
                sequence: raw.sequence_number,
                start,
            }
        }
        "media" => TelephonyEvent::Media {
            sequence: raw.sequence_number,
            stream_sid: raw.stream_sid,
            media: raw
                .media
                .ok_or_else(|| CallBridgeError::Transport("media event without payload".into()))?,
        },
        "stop" => TelephonyEvent::Stop {
            sequence: raw.sequence_number,
        },
        "mark" => TelephonyEvent::Mark {
            name: raw.mark.map(|m| m.name).unwrap_or_default(),
        },
        "dtmf" => TelephonyEvent::Dtmf {
            digit: raw.dtmf.map(|d| d.digit).unwrap_or_default(),
        },
        other => TelephonyEvent::Unknown {
            event: other.to_string(),
        },
    };
    Ok(event)
}

/// Outbound message written to the telephony transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundMessage {
    /// Wrap raw wire audio in a `media` envelope.
    pub fn media(stream_sid: &str, audio: &[u8]) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: base64::engine::general_purpose::STANDARD.encode(audio),
            },
        }
    }

    /// A named checkpoint.
    pub fn mark(stream_sid: &str, name: impl Into<String>) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload { name: name.into() },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Accept numbers encoded either as JSON numbers or numeric strings.
fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
