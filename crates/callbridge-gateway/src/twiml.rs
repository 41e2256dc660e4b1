//! TwiML answer for inbound calls.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use tracing::{debug, info};

use crate::state::GatewayState;

/// Seconds the call stays parked after the stream connects.
const PARK_SECONDS: u32 = 3600;

/// Greet the caller, connect the media stream, then park the call.
pub fn incoming_call_twiml(greeting: &str, stream_url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response>\
         <Say voice=\"Polly.Joanna-Neural\">{}</Say>\
         <Connect><Stream url=\"{}\" /></Connect>\
         <Pause length=\"{PARK_SECONDS}\" />\
         </Response>",
        escape_xml(greeting),
        escape_xml(stream_url),
    )
}

/// `wss://<host>/audio_stream`; the configured public hostname wins over
/// the request's `Host` header.
pub fn stream_url(public_hostname: Option<&str>, host_header: Option<&str>, port: u16) -> String {
    let host = public_hostname
        .or(host_header)
        .map(|h| h.trim_start_matches("https://").trim_start_matches("http://").trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("localhost:{port}"));
    format!("wss://{host}/audio_stream")
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// `POST /incoming_call`
pub async fn incoming_call_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    let url = stream_url(
        state.config.public_hostname().as_deref(),
        host,
        state.config.port(),
    );
    info!(stream_url = %url, "Answering inbound call");
    let body = incoming_call_twiml(&state.config.greeting(), &url);
    debug!(twiml = %body, "TwiML response");
    ([(header::CONTENT_TYPE, "application/xml")], body)
}
