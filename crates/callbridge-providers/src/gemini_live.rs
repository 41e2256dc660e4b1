//! Gemini Live (`BidiGenerateContent`) WebSocket backend.
//!
//! The client opens the socket with the API key in the query string, sends
//! a `setup` message, and waits for `setupComplete`. Afterwards it streams
//! `realtimeInput` audio and `toolResponse` batches while the server sends
//! `serverContent`, `toolCall`, `toolCallCancellation`, `goAway`, and
//! `usageMetadata` messages. Server JSON may arrive in text or binary frames.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use callbridge_core::config::Config;
use callbridge_core::error::{CallBridgeError, Result};
use callbridge_core::types::ToolCallRequest;

use crate::{ClientMessage, LiveConnection, LiveEvent, LiveSender, LiveSetup, RealtimeBackend};

const DEFAULT_BASE_URL: &str = "wss://generativelanguage.googleapis.com";
const BIDI_PATH: &str =
    "/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const CLIENT_QUEUE: usize = 64;

pub struct GeminiLiveBackend {
    base_url: String,
    api_key: String,
    connect_timeout: Duration,
}

impl GeminiLiveBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, connect_timeout: Duration) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let gemini = config.gemini.clone().unwrap_or_default();
        let api_key = gemini.resolve_api_key().ok_or_else(|| {
            CallBridgeError::Backend(
                "Gemini API key not configured (set gemini.api_key or GEMINI_API_KEY)".into(),
            )
        })?;
        Ok(Self::new(
            api_key,
            gemini.base_url.as_deref(),
            config.connect_timeout(),
        ))
    }

    fn endpoint(&self) -> String {
        format!("{}{}?key={}", self.base_url, BIDI_PATH, self.api_key)
    }
}

/// The `setup` message opening a session.
pub fn setup_message(setup: &LiveSetup) -> Value {
    let model = if setup.model.starts_with("models/") {
        setup.model.clone()
    } else {
        format!("models/{}", setup.model)
    };

    let mut body = json!({
        "model": model,
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": setup.voice }
                }
            }
        },
        "systemInstruction": {
            "parts": [{ "text": setup.system_instruction }]
        }
    });
    if !setup.function_declarations.is_empty() {
        body["tools"] = json!([{ "functionDeclarations": setup.function_declarations }]);
    }
    json!({ "setup": body })
}

/// Wire form of a client message.
pub fn client_message_json(message: &ClientMessage) -> Value {
    match message {
        ClientMessage::Audio { data, mime_type } => json!({
            "realtimeInput": {
                "audio": {
                    "data": base64::engine::general_purpose::STANDARD.encode(data),
                    "mimeType": mime_type,
                }
            }
        }),
        ClientMessage::AudioStreamEnd => json!({
            "realtimeInput": { "audioStreamEnd": true }
        }),
        ClientMessage::ToolResponse(results) => {
            let responses: Vec<Value> = results
                .iter()
                .map(|r| {
                    json!({
                        "id": r.call_id,
                        "name": r.name,
                        "response": r.response_payload(),
                    })
                })
                .collect();
            json!({ "toolResponse": { "functionResponses": responses } })
        }
    }
}

/// Translate one server message into events, in the order they apply.
pub fn parse_server_message(message: &Value) -> Vec<LiveEvent> {
    let mut events = Vec::new();

    if message.get("setupComplete").is_some() {
        events.push(LiveEvent::SetupComplete);
    }

    if let Some(calls) = message
        .pointer("/toolCall/functionCalls")
        .and_then(|c| c.as_array())
    {
        let requests: Vec<ToolCallRequest> = calls
            .iter()
            .map(|call| ToolCallRequest {
                call_id: call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name: call
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                args: call
                    .get("args")
                    .and_then(|v| v.as_object())
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();
        events.push(LiveEvent::ToolCalls(requests));
    }

    if let Some(content) = message.get("serverContent") {
        if let Some(parts) = content
            .pointer("/modelTurn/parts")
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(inline) = part.get("inlineData") {
                    let mime = inline
                        .get("mimeType")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let data = inline
                        .get("data")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    if !mime.starts_with("audio/") {
                        debug!(mime, "Ignoring non-audio inline data");
                        continue;
                    }
                    match base64::engine::general_purpose::STANDARD.decode(data) {
                        Ok(bytes) => events.push(LiveEvent::Audio(bytes)),
                        Err(e) => warn!(error = %e, "Dropping undecodable audio part"),
                    }
                } else if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    events.push(LiveEvent::Text(text.to_string()));
                }
            }
        }
        if flag(content, "interrupted") {
            events.push(LiveEvent::Interrupted);
        }
        if flag(content, "generationComplete") {
            events.push(LiveEvent::GenerationComplete);
        }
        if flag(content, "turnComplete") {
            events.push(LiveEvent::TurnComplete);
        }
    }

    if let Some(ids) = message
        .pointer("/toolCallCancellation/ids")
        .and_then(|v| v.as_array())
    {
        events.push(LiveEvent::ToolCallCancellation(
            ids.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
        ));
    }

    if let Some(go_away) = message.get("goAway") {
        events.push(LiveEvent::GoAway {
            time_left: go_away
                .get("timeLeft")
                .and_then(|v| v.as_str())
                .map(String::from),
        });
    }

    if let Some(usage) = message.get("usageMetadata") {
        events.push(LiveEvent::Usage(usage.clone()));
    }

    events
}

fn flag(content: &Value, key: &str) -> bool {
    content.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Extract the JSON body of a frame; `None` for frames that carry no message.
fn frame_json(message: &Message) -> Option<anyhow::Result<Value>> {
    match message {
        Message::Text(text) => Some(serde_json::from_str(text.as_str()).map_err(Into::into)),
        Message::Binary(bytes) => Some(serde_json::from_slice(bytes).map_err(Into::into)),
        _ => None,
    }
}

#[async_trait]
impl RealtimeBackend for GeminiLiveBackend {
    fn id(&self) -> &str {
        "gemini-live"
    }

    async fn connect(&self, setup: &LiveSetup) -> anyhow::Result<LiveConnection> {
        let handshake = async {
            let (mut ws, _response) = tokio_tungstenite::connect_async(self.endpoint()).await?;
            ws.send(Message::Text(setup_message(setup).to_string().into()))
                .await?;

            while let Some(frame) = ws.next().await {
                let frame = frame?;
                if let Message::Close(reason) = &frame {
                    anyhow::bail!("connection closed during setup: {reason:?}");
                }
                let Some(body) = frame_json(&frame) else {
                    continue;
                };
                if parse_server_message(&body?).contains(&LiveEvent::SetupComplete) {
                    return Ok(ws);
                }
            }
            anyhow::bail!("connection closed before setupComplete")
        };

        let ws = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| anyhow::anyhow!("Gemini Live handshake timed out"))??;
        info!(model = %setup.model, voice = %setup.voice, "Gemini Live session established");

        let (mut write, read) = ws.split();
        let (tx, mut rx) = mpsc::channel::<ClientMessage>(CLIENT_QUEUE);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let body = client_message_json(&message).to_string();
                trace!(bytes = body.len(), "-> Gemini Live");
                if let Err(e) = write.send(Message::Text(body.into())).await {
                    warn!(error = %e, "Gemini Live write failed");
                    return;
                }
            }
            let _ = write.close().await;
            debug!("Gemini Live writer finished");
        });

        let events = read
            .take_while(|frame| {
                let open = !matches!(frame, Ok(Message::Close(_)));
                async move { open }
            })
            .flat_map(|frame| {
                let items: Vec<anyhow::Result<LiveEvent>> = match frame {
                    Err(e) => vec![Err(e.into())],
                    Ok(frame) => match frame_json(&frame) {
                        None => Vec::new(),
                        Some(Err(e)) => vec![Err(e)],
                        Some(Ok(body)) => parse_server_message(&body)
                            .into_iter()
                            .filter(|e| *e != LiveEvent::SetupComplete)
                            .map(Ok)
                            .collect(),
                    },
                };
                futures::stream::iter(items)
            })
            .boxed();

        Ok(LiveConnection {
            sender: LiveSender::new(tx),
            events,
        })
    }
}
