//! Per-session audio conversion between the telephony wire format and the
//! linear PCM the AI backend speaks.
//!
//! [`Decoder`] turns 8 kHz μ-law into PCM at the backend input rate and
//! [`Encoder`] turns backend PCM back into 8 kHz μ-law. Each half owns its
//! own [`ResampleState`], so the two directions can run in separate tasks.

use callbridge_core::config::AudioConfig;
use callbridge_core::types::{AudioFormat, AudioFrame};
use tracing::warn;

use crate::mulaw;
use crate::resample::{ResampleState, resample};

/// Split 16-bit little-endian PCM bytes into samples.
///
/// A trailing odd byte is dropped with a warning.
pub fn pcm_from_bytes(bytes: &[u8]) -> Vec<i16> {
    if bytes.len() % 2 != 0 {
        warn!(
            len = bytes.len(),
            "PCM buffer is not a whole number of samples, truncating"
        );
    }
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialise samples as 16-bit little-endian PCM.
pub fn pcm_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Telephony μ-law → backend PCM.
#[derive(Debug, Clone)]
pub struct Decoder {
    wire_rate: u32,
    pcm_rate: u32,
    state: ResampleState,
}

impl Decoder {
    pub fn new(wire_rate: u32, pcm_rate: u32) -> Self {
        Self {
            wire_rate,
            pcm_rate,
            state: ResampleState::default(),
        }
    }

    /// Output format of [`Decoder::decode`].
    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::linear16(self.pcm_rate)
    }

    /// Convert μ-law bytes to PCM bytes at the backend input rate.
    pub fn decode(&mut self, wire: &[u8]) -> Vec<u8> {
        if wire.is_empty() {
            return Vec::new();
        }
        let linear = mulaw::decode(wire);
        let (converted, next) = resample(&linear, self.wire_rate, self.pcm_rate, self.state);
        self.state = next;
        pcm_to_bytes(&converted)
    }

    /// Decode a wire frame, keeping its sequence number and timestamp.
    pub fn decode_frame(&mut self, frame: &AudioFrame) -> AudioFrame {
        AudioFrame::new(self.decode(frame.data()), self.output_format(), frame.sequence())
            .with_timestamp(frame.timestamp_ms())
    }
}

/// Backend PCM → telephony μ-law.
#[derive(Debug, Clone)]
pub struct Encoder {
    pcm_rate: u32,
    wire_rate: u32,
    state: ResampleState,
}

impl Encoder {
    pub fn new(pcm_rate: u32, wire_rate: u32) -> Self {
        Self {
            pcm_rate,
            wire_rate,
            state: ResampleState::default(),
        }
    }

    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::mulaw(self.wire_rate)
    }

    /// Convert PCM bytes at the backend output rate to μ-law bytes.
    pub fn encode(&mut self, pcm: &[u8]) -> Vec<u8> {
        let samples = pcm_from_bytes(pcm);
        if samples.is_empty() {
            return Vec::new();
        }
        let (converted, next) = resample(&samples, self.pcm_rate, self.wire_rate, self.state);
        self.state = next;
        mulaw::encode(&converted)
    }

    pub fn encode_frame(&mut self, frame: &AudioFrame) -> AudioFrame {
        AudioFrame::new(self.encode(frame.data()), self.output_format(), frame.sequence())
            .with_timestamp(frame.timestamp_ms())
    }
}

/// Both conversion directions for one session.
#[derive(Debug, Clone)]
pub struct AudioCodec {
    decoder: Decoder,
    encoder: Encoder,
}

impl AudioCodec {
    /// Fresh codec with reset state.
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            decoder: Decoder::new(config.telephony_rate, config.input_rate),
            encoder: Encoder::new(config.output_rate, config.telephony_rate),
        }
    }

    pub fn decode(&mut self, wire: &[u8]) -> Vec<u8> {
        self.decoder.decode(wire)
    }

    pub fn encode(&mut self, pcm: &[u8]) -> Vec<u8> {
        self.encoder.encode(pcm)
    }

    /// Hand each direction to its own owner.
    pub fn split(self) -> (Decoder, Encoder) {
        (self.decoder, self.encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, freq: f64, amplitude: f64, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f64 / rate as f64;
                (amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    fn rms_error(a: &[i16], b: &[i16]) -> f64 {
        let n = a.len().min(b.len());
        let sum: f64 = a[..n]
            .iter()
            .zip(&b[..n])
            .map(|(&x, &y)| {
                let d = x as f64 - y as f64;
                d * d
            })
            .sum();
        (sum / n as f64).sqrt()
    }

    #[test]
    fn test_empty_input() {
        let mut codec = AudioCodec::new(&AudioConfig::default());
        assert!(codec.decode(&[]).is_empty());
        assert!(codec.encode(&[]).is_empty());
        assert!(codec.encode(&[0x12]).is_empty());
    }

    #[test]
    fn test_default_rates_sizes() {
        let mut codec = AudioCodec::new(&AudioConfig::default());
        // 20 ms at 8 kHz → 20 ms at 16 kHz (2 bytes per sample).
        assert_eq!(codec.decode(&[0xFF; 160]).len(), 640);
        // 20 ms at 24 kHz → 20 ms at 8 kHz.
        assert_eq!(codec.encode(&[0u8; 960]).len(), 160);
    }

    #[test]
    fn test_odd_length_truncated() {
        let mut encoder = Encoder::new(8000, 8000);
        let pcm = pcm_to_bytes(&[0, 1000, -1000]);
        let mut odd = pcm.clone();
        odd.push(0x55);
        assert_eq!(encoder.encode(&odd).len(), 3);
    }

    #[test]
    fn test_round_trip_is_close() {
        let config = AudioConfig {
            telephony_rate: 8000,
            input_rate: 16000,
            output_rate: 16000,
        };
        let (mut decoder, mut encoder) = AudioCodec::new(&config).split();

        let amplitude = 8000.0;
        let original = sine(16000, 200.0, amplitude, 3200);
        let wire = encoder.encode(&pcm_to_bytes(&original));
        let back = pcm_from_bytes(&decoder.decode(&wire));
        assert_eq!(back.len(), original.len());

        // Each resampling pass adds a small fixed delay; align before comparing.
        let best = (0..8)
            .map(|lag| rms_error(&original, &back[lag..]))
            .fold(f64::MAX, f64::min);
        assert!(best < amplitude * 0.05, "rms error {best}");
    }

    #[test]
    fn test_state_threads_across_chunks() {
        let mut whole = Decoder::new(8000, 16000);
        let wire = mulaw::encode(&sine(8000, 300.0, 6000.0, 480));
        let expected = whole.decode(&wire);

        let mut chunked = Decoder::new(8000, 16000);
        let mut got = Vec::new();
        for chunk in wire.chunks(160) {
            got.extend(chunked.decode(chunk));
        }
        assert_eq!(expected, got);
    }

    #[test]
    fn test_decode_frame_keeps_metadata() {
        let mut decoder = Decoder::new(8000, 16000);
        let frame = AudioFrame::new(vec![0xFF; 160], AudioFormat::mulaw(8000), 7)
            .with_timestamp(Some(140));
        let pcm = decoder.decode_frame(&frame);
        assert_eq!(pcm.sequence(), 7);
        assert_eq!(pcm.timestamp_ms(), Some(140));
        assert_eq!(pcm.format(), AudioFormat::linear16(16000));
        assert_eq!(pcm.duration_ms(), 20);
    }
}
