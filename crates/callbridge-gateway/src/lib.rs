//! HTTP and WebSocket gateway for CallBridge.
//!
//! Serves the telephony media-stream endpoint (`/audio_stream`), the
//! inbound-call TwiML webhook, health and session listings, and the tool
//! control plane. Each media-stream connection runs one
//! [`callbridge_session::SessionController`].

pub mod connection;
pub mod hot_reload;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;
pub mod tools_api;
pub mod twiml;

pub use server::{router, start_gateway};
pub use state::GatewayState;
