//! Outbound sender: outbound audio queue → telephony `media` messages.

use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use callbridge_core::protocol::OutboundMessage;

use crate::queue::OutboundItem;
use crate::signal::StreamStartWaiter;

pub struct OutboundContext {
    pub session_id: String,
    pub start: StreamStartWaiter,
    pub queue: mpsc::Receiver<OutboundItem>,
    pub cancel: CancellationToken,
    /// Forward end-of-turn markers as telephony `mark` messages.
    pub send_turn_marks: bool,
}

/// The sink handed back so the caller can close the transport, plus what was written.
pub struct OutboundOutcome<O> {
    pub sink: O,
    pub frames: u64,
    pub marks: u64,
    pub write_failed: bool,
}

/// Drain the outbound queue into the telephony transport until the
/// terminator, a write failure, or the session end signal.
///
/// Items already queued are written before the end signal is honoured.
pub async fn run_outbound<O>(mut sink: O, ctx: OutboundContext) -> OutboundOutcome<O>
where
    O: Sink<String, Error = anyhow::Error> + Unpin,
{
    let OutboundContext {
        session_id,
        start,
        mut queue,
        cancel,
        send_turn_marks,
    } = ctx;

    let mut frames = 0u64;
    let mut marks = 0u64;
    let mut turns = 0u64;
    let mut write_failed = false;

    loop {
        let item = tokio::select! {
            biased;
            item = queue.recv() => item,
            _ = cancel.cancelled() => break,
        };

        let message = match item {
            None | Some(OutboundItem::End) => break,
            Some(OutboundItem::TurnEnd) => {
                turns += 1;
                if !send_turn_marks {
                    continue;
                }
                let Some(stream_sid) = start.stream_sid() else {
                    continue;
                };
                OutboundMessage::mark(&stream_sid, format!("turn-{turns}"))
            }
            Some(OutboundItem::Audio(frame)) => {
                if frame.is_empty() {
                    continue;
                }
                let Some(stream_sid) = start.stream_sid() else {
                    warn!(%session_id, "Outbound audio before the stream started, dropping");
                    continue;
                };
                OutboundMessage::media(&stream_sid, frame.data())
            }
        };

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(%session_id, error = %e, "Failed to serialize outbound message");
                continue;
            }
        };
        let is_mark = matches!(message, OutboundMessage::Mark { .. });
        if let Err(e) = sink.send(text).await {
            warn!(%session_id, error = %e, "Telephony write failed, stopping outbound sender");
            write_failed = true;
            break;
        }
        if is_mark {
            marks += 1;
        } else {
            frames += 1;
        }
    }

    debug!(%session_id, frames, marks, turns, write_failed, "Outbound sender finished");
    OutboundOutcome {
        sink,
        frames,
        marks,
        write_failed,
    }
}
