//! Gemini Live client tests.
//!
//! The mock-server tests run a local WebSocket server speaking the
//! `BidiGenerateContent` message shapes. The live test is skipped when
//! `GEMINI_API_KEY` is not set.
//! Run with: `cargo test -p callbridge-providers --test integration`

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use callbridge_core::types::{AudioFormat, ToolCallRequest, ToolCallResult};
use callbridge_providers::{GeminiLiveBackend, LiveEvent, LiveSetup, RealtimeBackend};

fn setup() -> LiveSetup {
    LiveSetup {
        model: "gemini-2.0-flash-live-001".into(),
        voice: "Puck".into(),
        system_instruction: "Reply briefly.".into(),
        function_declarations: vec![json!({
            "name": "get_menu",
            "description": "Menu",
            "parameters": { "type": "object", "properties": {} }
        })],
        input_format: AudioFormat::linear16(16000),
        output_format: AudioFormat::linear16(24000),
    }
}

/// Accept one client, check the setup, then answer every client message
/// according to `respond`. Returns the messages the client sent.
async fn mock_server<F>(respond: F) -> (String, tokio::task::JoinHandle<Vec<Value>>)
where
    F: Fn(&Value) -> Vec<Value> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut received = Vec::new();

        while let Some(Ok(frame)) = ws.next().await {
            let body: Value = match frame {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                Message::Close(_) => break,
                _ => continue,
            };
            let replies = if body.get("setup").is_some() {
                vec![json!({ "setupComplete": {} })]
            } else {
                respond(&body)
            };
            received.push(body);
            for reply in replies {
                // Binary frames carry JSON too.
                let frame = Message::Binary(reply.to_string().into_bytes().into());
                if ws.send(frame).await.is_err() {
                    return received;
                }
            }
        }
        received
    });

    (format!("ws://{addr}"), handle)
}

#[tokio::test]
async fn test_mock_audio_round_trip() {
    let (url, server) = mock_server(|body| {
        if body.pointer("/realtimeInput/audio").is_some() {
            vec![json!({
                "serverContent": {
                    "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAEC" } }] }
                }
            })]
        } else if body.pointer("/realtimeInput/audioStreamEnd").is_some() {
            vec![json!({ "serverContent": { "turnComplete": true } })]
        } else {
            vec![]
        }
    })
    .await;

    let backend = GeminiLiveBackend::new("test-key", Some(&url), Duration::from_secs(5));
    let mut conn = backend.connect(&setup()).await.unwrap();

    conn.sender
        .send_audio(vec![0u8; 640], &AudioFormat::linear16(16000))
        .await
        .unwrap();
    conn.sender.audio_stream_end().await.unwrap();

    assert_eq!(
        conn.events.next().await.unwrap().unwrap(),
        LiveEvent::Audio(vec![0, 1, 2])
    );
    assert_eq!(
        conn.events.next().await.unwrap().unwrap(),
        LiveEvent::TurnComplete
    );

    drop(conn);
    let received = server.await.unwrap();
    assert_eq!(
        received[0]["setup"]["model"],
        "models/gemini-2.0-flash-live-001"
    );
    assert_eq!(
        received[1]["realtimeInput"]["audio"]["mimeType"],
        "audio/pcm;rate=16000"
    );
    assert_eq!(received[2]["realtimeInput"]["audioStreamEnd"], true);
}

#[tokio::test]
async fn test_mock_tool_call_and_go_away() {
    let (url, server) = mock_server(|body| {
        if body.get("toolResponse").is_some() {
            vec![json!({ "goAway": { "timeLeft": "5s" } })]
        } else {
            vec![json!({
                "toolCall": { "functionCalls": [{ "id": "fc-1", "name": "get_menu", "args": {} }] }
            })]
        }
    })
    .await;

    let backend = GeminiLiveBackend::new("test-key", Some(&url), Duration::from_secs(5));
    let mut conn = backend.connect(&setup()).await.unwrap();

    conn.sender
        .send_audio(vec![0u8; 4], &AudioFormat::linear16(16000))
        .await
        .unwrap();

    let calls = match conn.events.next().await.unwrap().unwrap() {
        LiveEvent::ToolCalls(calls) => calls,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(calls.len(), 1);
    let request: &ToolCallRequest = &calls[0];
    conn.sender
        .send_tool_responses(vec![ToolCallResult::success(request, json!({"menu": []}))])
        .await
        .unwrap();

    assert_eq!(
        conn.events.next().await.unwrap().unwrap(),
        LiveEvent::GoAway {
            time_left: Some("5s".into())
        }
    );

    drop(conn);
    let received = server.await.unwrap();
    let response = &received[2]["toolResponse"]["functionResponses"][0];
    assert_eq!(response["id"], "fc-1");
    assert_eq!(response["response"]["result"], json!({"menu": []}));
}

#[tokio::test]
async fn test_handshake_timeout() {
    // Accepts the socket but never answers the setup.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let backend = GeminiLiveBackend::new(
        "test-key",
        Some(&format!("ws://{addr}")),
        Duration::from_millis(200),
    );
    let err = backend.connect(&setup()).await.err().unwrap();
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_live_gemini_session() {
    let Some(api_key) = std::env::var("GEMINI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
    else {
        eprintln!("Skipping: GEMINI_API_KEY not set");
        return;
    };

    let backend = GeminiLiveBackend::new(api_key, None, Duration::from_secs(15));
    let mut conn = backend.connect(&setup()).await.expect("connect");

    // One second of silence, then end of input.
    conn.sender
        .send_audio(vec![0u8; 32000], &AudioFormat::linear16(16000))
        .await
        .unwrap();
    conn.sender.audio_stream_end().await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(20), conn.events.next()).await;
    assert!(first.is_ok(), "no event from Gemini Live within 20s");
}
