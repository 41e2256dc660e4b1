//! Streaming linear-interpolation resampler.
//!
//! The conversion is split into chunks that arrive over time, so the state
//! between calls (the last input sample and the fractional read position)
//! is threaded explicitly: each call takes the previous [`ResampleState`]
//! and returns the next one.

/// Conversion state carried from one chunk to the next.
///
/// `phase` is the position of the next output sample measured from `last`,
/// in units of `1 / to_rate` input samples (rates reduced by their gcd).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResampleState {
    last: Option<i16>,
    phase: u64,
}

impl ResampleState {
    /// Whether any input has been seen yet.
    pub fn is_fresh(&self) -> bool {
        self.last.is_none()
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Resample `samples` from `from_rate` to `to_rate`.
///
/// On the first call the first sample is duplicated as its own predecessor,
/// which introduces a fixed delay of one input sample. Empty input returns
/// empty output and leaves the state unchanged. A zero rate yields no output.
pub fn resample(
    samples: &[i16],
    from_rate: u32,
    to_rate: u32,
    state: ResampleState,
) -> (Vec<i16>, ResampleState) {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return (Vec::new(), state);
    }
    if from_rate == to_rate {
        let last = samples.last().copied();
        return (samples.to_vec(), ResampleState { last, phase: 0 });
    }

    let divisor = gcd(from_rate as u64, to_rate as u64);
    let step = from_rate as u64 / divisor;
    let scale = to_rate as u64 / divisor;

    let previous = state.last.unwrap_or(samples[0]);
    let at = |index: u64| -> i64 {
        if index == 0 {
            previous as i64
        } else {
            samples[index as usize - 1] as i64
        }
    };

    let n = samples.len() as u64;
    let mut phase = state.phase;
    let mut out = Vec::with_capacity((n * scale / step + 1) as usize);

    while phase / scale < n {
        let index = phase / scale;
        let frac = (phase % scale) as i64;
        let left = at(index);
        let right = at(index + 1);
        let value = (left * (scale as i64 - frac) + right * frac) / scale as i64;
        out.push(value as i16);
        phase += step;
    }

    let next = ResampleState {
        last: samples.last().copied(),
        phase: phase - n * scale,
    };
    (out, next)
}
