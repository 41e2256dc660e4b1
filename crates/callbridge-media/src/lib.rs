//! Audio transcoding for the telephony bridge: μ-law companding, streaming
//! linear resampling, and the per-session codec built from them.

pub mod codec;
pub mod mulaw;
pub mod resample;

pub use codec::{AudioCodec, Decoder, Encoder};
pub use resample::ResampleState;
