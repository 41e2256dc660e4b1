//! Items carried by the two per-session audio queues.
//!
//! Both queues are bounded single-producer/single-consumer `mpsc` channels.
//! `End` is the explicit terminator; a dropped producer reads the same way.

use tokio::sync::mpsc;

use callbridge_core::types::AudioFrame;

/// Telephony → bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundItem {
    Frame(AudioFrame),
    End,
}

/// Bridge → telephony.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundItem {
    Audio(AudioFrame),
    /// End of one AI turn; never written as audio.
    TurnEnd,
    End,
}

pub fn inbound_queue(capacity: usize) -> (mpsc::Sender<InboundItem>, mpsc::Receiver<InboundItem>) {
    mpsc::channel(capacity.max(1))
}

pub fn outbound_queue(
    capacity: usize,
) -> (mpsc::Sender<OutboundItem>, mpsc::Receiver<OutboundItem>) {
    mpsc::channel(capacity.max(1))
}
