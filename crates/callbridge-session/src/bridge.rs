//! AI session bridge.
//!
//! The sender half waits for the stream to start, opens the backend
//! connection, and forwards decoded inbound audio. The receiver half
//! consumes backend events: audio is encoded and queued for the caller,
//! tool-call batches are dispatched and answered before the next event is
//! read, and turn boundaries become explicit markers on the outbound queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use callbridge_core::types::AudioFrame;
use callbridge_media::{Decoder, Encoder};
use callbridge_providers::{LiveConnection, LiveEvent, LiveSetup, RealtimeBackend};
use callbridge_tools::{ToolContext, ToolDispatcher};

use crate::queue::{InboundItem, OutboundItem};
use crate::signal::StreamStartWaiter;
use crate::turn::TurnPhase;

/// Why the bridge stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeEnd {
    /// The inbound side ended before `start`; the backend was never contacted.
    NoStream,
    ConnectFailed,
    /// Input closed and the last turn resolved.
    Drained,
    GoAway,
    /// The backend stream ended or failed.
    BackendClosed,
    #[default]
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeStats {
    pub frames_forwarded: u64,
    pub audio_chunks_received: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub turns: u64,
    pub end: BridgeEnd,
}

pub struct BridgeContext {
    pub session_id: String,
    pub backend: Arc<dyn RealtimeBackend>,
    /// Session setup; function declarations are filled from the registry
    /// snapshot at connect time.
    pub setup: LiveSetup,
    pub dispatcher: ToolDispatcher,
    pub decoder: Decoder,
    pub encoder: Encoder,
    pub start: StreamStartWaiter,
    pub inbound: mpsc::Receiver<InboundItem>,
    pub outbound: mpsc::Sender<OutboundItem>,
    pub cancel: CancellationToken,
}

/// Run the bridge for one session. The outbound queue receives exactly one
/// terminator and the session end signal fires before this returns.
pub async fn run_bridge(ctx: BridgeContext) -> BridgeStats {
    let BridgeContext {
        session_id,
        backend,
        mut setup,
        dispatcher,
        decoder,
        encoder,
        mut start,
        inbound,
        outbound,
        cancel,
    } = ctx;

    let mut stats = BridgeStats::default();
    stats.end = relay(
        &session_id,
        backend.as_ref(),
        &mut setup,
        &dispatcher,
        decoder,
        encoder,
        &mut start,
        inbound,
        &outbound,
        &cancel,
        &mut stats,
    )
    .await;

    tokio::select! {
        biased;
        _ = outbound.send(OutboundItem::End) => {}
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    info!(
        %session_id,
        end = ?stats.end,
        frames = stats.frames_forwarded,
        tool_calls = stats.tool_calls,
        turns = stats.turns,
        "AI bridge finished"
    );
    stats
}

#[allow(clippy::too_many_arguments)]
async fn relay(
    session_id: &str,
    backend: &dyn RealtimeBackend,
    setup: &mut LiveSetup,
    dispatcher: &ToolDispatcher,
    mut decoder: Decoder,
    mut encoder: Encoder,
    start: &mut StreamStartWaiter,
    inbound: mpsc::Receiver<InboundItem>,
    outbound: &mpsc::Sender<OutboundItem>,
    cancel: &CancellationToken,
    stats: &mut BridgeStats,
) -> BridgeEnd {
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return BridgeEnd::Cancelled,
        stream = start.wait() => stream,
    };
    let Some(stream) = stream else {
        info!(%session_id, "Inbound ended before the stream started");
        return BridgeEnd::NoStream;
    };

    setup.function_declarations = dispatcher.registry().snapshot().to_function_declarations();
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => return BridgeEnd::Cancelled,
        connected = backend.connect(setup) => connected,
    };
    let LiveConnection { sender, mut events } = match connected {
        Ok(conn) => conn,
        Err(e) => {
            error!(%session_id, backend = backend.id(), error = %e, "Failed to connect AI backend");
            return BridgeEnd::ConnectFailed;
        }
    };
    info!(
        %session_id,
        stream_sid = %stream.stream_sid,
        backend = backend.id(),
        tools = setup.function_declarations.len(),
        "AI session connected"
    );

    let input_format = setup.input_format;
    let output_format = setup.output_format;
    let tool_context = ToolContext::new(session_id, Some(stream.stream_sid.clone()));
    let input_closed = AtomicBool::new(false);
    // Stops the sender half when the receiver half gives up.
    let halves = cancel.child_token();

    let send_half = async {
        let mut inbound = inbound;
        let mut forwarded = 0u64;
        loop {
            let item = tokio::select! {
                biased;
                _ = halves.cancelled() => break,
                item = inbound.recv() => item,
            };
            match item {
                Some(InboundItem::Frame(frame)) => {
                    let pcm = decoder.decode_frame(&frame);
                    if pcm.is_empty() {
                        continue;
                    }
                    if let Err(e) = sender.send_audio(pcm.into_data(), &input_format).await {
                        warn!(%session_id, error = %e, "Failed to forward audio, stopping sender");
                        break;
                    }
                    forwarded += 1;
                }
                Some(InboundItem::End) | None => {
                    input_closed.store(true, Ordering::SeqCst);
                    if let Err(e) = sender.audio_stream_end().await {
                        debug!(%session_id, error = %e, "Could not signal end of audio");
                    }
                    break;
                }
            }
        }
        input_closed.store(true, Ordering::SeqCst);
        forwarded
    };

    let receive_half = async {
        let mut phase = TurnPhase::Idle;
        let mut counters = BridgeStats::default();
        let end = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break BridgeEnd::Cancelled,
                event = events.next() => event,
            };
            let event = match event {
                None => {
                    info!(%session_id, "AI backend stream ended");
                    break BridgeEnd::BackendClosed;
                }
                Some(Err(e)) => {
                    warn!(%session_id, error = %e, "AI backend receive error");
                    break BridgeEnd::BackendClosed;
                }
                Some(Ok(event)) => event,
            };

            match event {
                LiveEvent::ToolCalls(calls) => {
                    phase = phase.on_tool_calls();
                    info!(%session_id, count = calls.len(), "Tool call batch received");
                    let results = dispatcher.execute_batch(&calls, &tool_context).await;
                    counters.tool_calls += results.len() as u64;
                    counters.tool_errors += results.iter().filter(|r| r.is_error()).count() as u64;
                    if let Err(e) = sender.send_tool_responses(results).await {
                        warn!(%session_id, error = %e, "Failed to send tool responses");
                    }
                }
                LiveEvent::Audio(pcm) => {
                    phase = phase.on_model_output();
                    counters.audio_chunks_received += 1;
                    let chunk = AudioFrame::new(pcm, output_format, counters.audio_chunks_received);
                    let frame = encoder.encode_frame(&chunk);
                    if frame.is_empty() {
                        continue;
                    }
                    if outbound.send(OutboundItem::Audio(frame)).await.is_err() {
                        debug!(%session_id, "Outbound queue closed, discarding audio");
                    }
                }
                LiveEvent::Text(text) => {
                    phase = phase.on_model_output();
                    info!(%session_id, %text, "AI text");
                }
                LiveEvent::Interrupted => {
                    info!(%session_id, "AI turn interrupted by caller");
                }
                LiveEvent::TurnComplete => {
                    let (next, marker) = phase.on_turn_complete();
                    phase = next;
                    if !marker {
                        debug!(%session_id, "Turn complete while a tool result is pending, no marker");
                        continue;
                    }
                    counters.turns += 1;
                    if outbound.send(OutboundItem::TurnEnd).await.is_err() {
                        debug!(%session_id, "Outbound queue closed, discarding turn marker");
                    }
                    if input_closed.load(Ordering::SeqCst) {
                        break BridgeEnd::Drained;
                    }
                }
                LiveEvent::ToolCallCancellation(ids) => {
                    info!(%session_id, ?ids, "AI cancelled tool calls");
                }
                LiveEvent::GenerationComplete => {
                    debug!(%session_id, "Generation complete");
                }
                LiveEvent::GoAway { time_left } => {
                    warn!(%session_id, ?time_left, "AI backend is going away, ending session");
                    cancel.cancel();
                    break BridgeEnd::GoAway;
                }
                LiveEvent::Usage(usage) => {
                    debug!(%session_id, %usage, "Usage");
                }
                LiveEvent::SetupComplete => {}
            }
        };
        if end != BridgeEnd::Drained {
            halves.cancel();
        }
        (end, counters)
    };

    let (forwarded, (end, counters)) = tokio::join!(send_half, receive_half);
    stats.frames_forwarded = forwarded;
    stats.audio_chunks_received = counters.audio_chunks_received;
    stats.tool_calls = counters.tool_calls;
    stats.tool_errors = counters.tool_errors;
    stats.turns = counters.turns;
    end
}
