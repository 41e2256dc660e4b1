//! Per-call session pipeline.
//!
//! One call runs three tasks: the inbound receiver (telephony → inbound
//! queue), the AI bridge (inbound queue → backend → outbound queue, with
//! tool calls dispatched in between), and the outbound sender (outbound
//! queue → telephony). The [`SessionController`] owns them and the
//! session state machine.

pub mod bridge;
pub mod controller;
pub mod inbound;
pub mod outbound;
pub mod queue;
pub mod signal;
pub mod state;
pub mod turn;

#[cfg(test)]
mod test_support;

pub use bridge::{BridgeEnd, BridgeStats};
pub use controller::{SessionController, SessionReport, SessionSettings};
pub use inbound::InboundEnd;
pub use state::SessionState;
