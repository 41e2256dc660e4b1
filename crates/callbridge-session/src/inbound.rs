//! Inbound receiver: telephony messages → inbound audio queue.

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use callbridge_core::protocol::{TelephonyEvent, parse_event};
use callbridge_core::types::{AudioFormat, AudioFrame};

use crate::queue::InboundItem;
use crate::signal::{StreamStart, StreamStartLatch};

/// Why the inbound receiver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundEnd {
    Stop,
    Disconnected,
    TransportError,
    Malformed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboundStats {
    pub frames: u64,
    pub dropped: u64,
    pub end: InboundEnd,
}

pub struct InboundContext {
    pub session_id: String,
    pub latch: StreamStartLatch,
    pub queue: mpsc::Sender<InboundItem>,
    pub cancel: CancellationToken,
    /// Format of telephony audio (μ-law at the telephony rate).
    pub wire_format: AudioFormat,
}

/// Read the telephony transport until `stop`, disconnect, a malformed
/// message, or the session end signal. The terminator is pushed on every
/// exit path.
pub async fn run_inbound<S>(mut transport: S, ctx: InboundContext) -> InboundStats
where
    S: Stream<Item = anyhow::Result<String>> + Unpin,
{
    let InboundContext {
        session_id,
        latch,
        queue,
        cancel,
        wire_format,
    } = ctx;

    let mut frames = 0u64;
    let mut dropped = 0u64;
    let mut consumer_gone = false;

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break InboundEnd::Cancelled,
            next = transport.next() => next,
        };

        let text = match next {
            None => {
                info!(%session_id, "Telephony transport closed");
                break InboundEnd::Disconnected;
            }
            Some(Err(e)) => {
                warn!(%session_id, error = %e, "Telephony transport error");
                break InboundEnd::TransportError;
            }
            Some(Ok(text)) => text,
        };

        let event = match parse_event(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!(%session_id, error = %e, "Malformed telephony message, ending stream");
                break InboundEnd::Malformed;
            }
        };

        match event {
            TelephonyEvent::Connected { protocol } => {
                info!(%session_id, ?protocol, "Telephony stream connected");
            }
            TelephonyEvent::Start { start, .. } => {
                let Some(stream_sid) = start.stream_sid.filter(|s| !s.is_empty()) else {
                    error!(%session_id, "start message without a stream identifier");
                    continue;
                };
                let resolved = latch.resolve(StreamStart {
                    stream_sid: stream_sid.clone(),
                    call_sid: start.call_sid.clone(),
                    custom_parameters: start.custom_parameters,
                });
                if resolved {
                    info!(%session_id, %stream_sid, call_sid = ?start.call_sid, "Media stream started");
                } else {
                    warn!(%session_id, %stream_sid, "Duplicate start message ignored");
                }
            }
            TelephonyEvent::Media {
                sequence, media, ..
            } => {
                if !latch.is_resolved() {
                    warn!(%session_id, ?sequence, "Media before start, dropping");
                    dropped += 1;
                    continue;
                }
                let data = match media.decode_audio() {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(%session_id, ?sequence, error = %e, "Undecodable media payload, dropping");
                        dropped += 1;
                        continue;
                    }
                };
                if consumer_gone {
                    dropped += 1;
                    continue;
                }

                let frame = AudioFrame::new(data, wire_format, sequence.unwrap_or(frames))
                    .with_timestamp(media.timestamp);
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break InboundEnd::Cancelled,
                    sent = queue.send(InboundItem::Frame(frame)) => sent,
                };
                if sent.is_err() {
                    warn!(%session_id, "Inbound queue consumer gone, discarding audio");
                    consumer_gone = true;
                    dropped += 1;
                } else {
                    frames += 1;
                }
            }
            TelephonyEvent::Stop { .. } => {
                info!(%session_id, "Telephony stream stopped");
                break InboundEnd::Stop;
            }
            TelephonyEvent::Mark { name } => {
                debug!(%session_id, mark = %name, "Mark acknowledged");
            }
            TelephonyEvent::Dtmf { digit } => {
                info!(%session_id, %digit, "DTMF digit received");
            }
            TelephonyEvent::Unknown { event } => {
                debug!(%session_id, %event, "Ignoring unknown telephony event");
            }
        }
    };

    // Waiters learn the stream will never start before the terminator lands.
    drop(latch);
    tokio::select! {
        biased;
        _ = queue.send(InboundItem::End) => {}
        _ = cancel.cancelled() => {}
    }

    debug!(%session_id, frames, dropped, ?end, "Inbound receiver finished");
    InboundStats {
        frames,
        dropped,
        end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::stream_start_latch;
    use serde_json::json;

    fn start_msg(sid: &str) -> String {
        json!({ "event": "start", "start": { "streamSid": sid, "callSid": "CA1" } }).to_string()
    }

    fn media_msg(seq: u64, payload: &str) -> String {
        json!({
            "event": "media",
            "sequenceNumber": seq.to_string(),
            "media": { "payload": payload, "timestamp": (seq * 20).to_string() }
        })
        .to_string()
    }

    fn stop_msg() -> String {
        json!({ "event": "stop" }).to_string()
    }

    async fn run(
        messages: Vec<anyhow::Result<String>>,
    ) -> (InboundStats, Vec<InboundItem>, Option<StreamStart>) {
        let (latch, waiter) = stream_start_latch();
        let (tx, mut rx) = mpsc::channel(64);
        let stats = run_inbound(
            futures::stream::iter(messages),
            InboundContext {
                session_id: "test".into(),
                latch,
                queue: tx,
                cancel: CancellationToken::new(),
                wire_format: AudioFormat::mulaw(8000),
            },
        )
        .await;
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        (stats, items, waiter.current())
    }

    #[tokio::test]
    async fn test_media_then_stop_ends_with_one_terminator() {
        let (stats, items, start) = run(vec![
            Ok(json!({ "event": "connected", "protocol": "Call" }).to_string()),
            Ok(start_msg("MZ1")),
            Ok(media_msg(2, "AAEC")),
            Ok(media_msg(3, "AwQF")),
            Ok(stop_msg()),
            Ok(media_msg(4, "AAEC")),
        ])
        .await;

        assert_eq!(stats.end, InboundEnd::Stop);
        assert_eq!(stats.frames, 2);
        assert_eq!(start.unwrap().stream_sid, "MZ1");
        assert_eq!(items.len(), 3);
        assert_eq!(items.last(), Some(&InboundItem::End));
        assert_eq!(
            items.iter().filter(|i| **i == InboundItem::End).count(),
            1
        );
        match &items[0] {
            InboundItem::Frame(frame) => {
                assert_eq!(frame.data(), &[0, 1, 2]);
                assert_eq!(frame.sequence(), 2);
                assert_eq!(frame.timestamp_ms(), Some(40));
                assert_eq!(frame.format(), AudioFormat::mulaw(8000));
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_media_before_start_dropped() {
        let (stats, items, _) = run(vec![
            Ok(media_msg(1, "AAEC")),
            Ok(start_msg("MZ1")),
            Ok(media_msg(2, "AwQF")),
            Ok(stop_msg()),
        ])
        .await;

        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.frames, 1);
        match &items[0] {
            InboundItem::Frame(frame) => assert_eq!(frame.sequence(), 2),
            other => panic!("unexpected item: {other:?}"),
        }
        assert_eq!(items[1], InboundItem::End);
    }

    #[tokio::test]
    async fn test_start_without_sid_does_not_resolve() {
        let (_, items, start) = run(vec![
            Ok(json!({ "event": "start", "start": {} }).to_string()),
            Ok(media_msg(1, "AAEC")),
        ])
        .await;
        assert!(start.is_none());
        assert_eq!(items, vec![InboundItem::End]);
    }

    #[tokio::test]
    async fn test_bad_payload_dropped() {
        let (stats, items, _) = run(vec![
            Ok(start_msg("MZ1")),
            Ok(media_msg(1, "!!not base64!!")),
            Ok(stop_msg()),
        ])
        .await;
        assert_eq!(stats.dropped, 1);
        assert_eq!(items, vec![InboundItem::End]);
    }

    #[tokio::test]
    async fn test_malformed_and_errors_end_stream() {
        let (stats, items, _) = run(vec![Ok(start_msg("MZ1")), Ok("{oops".into())]).await;
        assert_eq!(stats.end, InboundEnd::Malformed);
        assert_eq!(items, vec![InboundItem::End]);

        let (stats, items, _) = run(vec![Err(anyhow::anyhow!("reset"))]).await;
        assert_eq!(stats.end, InboundEnd::TransportError);
        assert_eq!(items, vec![InboundItem::End]);

        let (stats, items, _) = run(vec![Ok(start_msg("MZ1"))]).await;
        assert_eq!(stats.end, InboundEnd::Disconnected);
        assert_eq!(items, vec![InboundItem::End]);
    }

    #[tokio::test]
    async fn test_control_events_are_ignored() {
        let (stats, items, _) = run(vec![
            Ok(start_msg("MZ1")),
            Ok(json!({ "event": "mark", "mark": { "name": "turn-1" } }).to_string()),
            Ok(json!({ "event": "dtmf", "dtmf": { "digit": "5" } }).to_string()),
            Ok(json!({ "event": "whatever" }).to_string()),
            Ok(stop_msg()),
        ])
        .await;
        assert_eq!(stats.end, InboundEnd::Stop);
        assert_eq!(items, vec![InboundItem::End]);
    }

    #[tokio::test]
    async fn test_cancel_ends_receiver() {
        let (latch, _waiter) = stream_start_latch();
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let (_msg_tx, msg_rx) = mpsc::unbounded_channel::<anyhow::Result<String>>();

        let task = tokio::spawn(run_inbound(
            tokio_stream::wrappers::UnboundedReceiverStream::new(msg_rx),
            InboundContext {
                session_id: "test".into(),
                latch,
                queue: tx,
                cancel: cancel.clone(),
                wire_format: AudioFormat::mulaw(8000),
            },
        ));
        cancel.cancel();
        let stats = task.await.unwrap();
        assert_eq!(stats.end, InboundEnd::Cancelled);
        assert_eq!(rx.recv().await, Some(InboundItem::End));
    }

    #[tokio::test]
    async fn test_consumer_gone_keeps_watching_for_stop() {
        let (latch, _waiter) = stream_start_latch();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let stats = run_inbound(
            futures::stream::iter(vec![
                Ok(start_msg("MZ1")),
                Ok(media_msg(1, "AAEC")),
                Ok(media_msg(2, "AAEC")),
                Ok(stop_msg()),
            ]),
            InboundContext {
                session_id: "test".into(),
                latch,
                queue: tx,
                cancel: CancellationToken::new(),
                wire_format: AudioFormat::mulaw(8000),
            },
        )
        .await;
        assert_eq!(stats.end, InboundEnd::Stop);
        assert_eq!(stats.frames, 0);
        assert_eq!(stats.dropped, 2);
    }
}
