//! Loudness monitoring
//!
//! Per-chunk RMS and peak with exponential smoothing (100 ms time
//! constant), plus a slowly adapting normalization scalar that steers
//! `0.7 * long_term_rms` toward the 0.1 target level.

use serde::{Deserialize, Serialize};

/// Fast smoothing time constant (seconds)
const SMOOTHING_TAU: f32 = 0.1;

/// Long-term level time constant (seconds)
const LONG_TERM_TAU: f32 = 3.0;

/// Normalization slew time constant (seconds)
const NORM_TAU: f32 = 1.0;

/// Target level for the normalized signal
const TARGET_LEVEL: f32 = 0.1;

/// Headroom factor applied to the long-term RMS before normalization
const HEADROOM: f32 = 0.7;

/// Gain bounds for the normalization scalar
const MIN_GAIN: f32 = 0.25;
const MAX_GAIN: f32 = 8.0;

/// Current loudness figures
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LoudnessReading {
    /// Smoothed RMS level
    pub rms: f32,
    /// Smoothed absolute peak
    pub peak: f32,
    /// Gain that would bring the signal to the target level
    pub normalization_scalar: f32,
}

/// Streaming RMS/peak meter with normalization tracking
#[derive(Debug, Clone)]
pub struct LoudnessMonitor {
    sample_rate: f32,
    smoothed_rms: f32,
    smoothed_peak: f32,
    long_term_rms: f32,
    normalization: f32,
    primed: bool,
}

impl LoudnessMonitor {
    /// Create a monitor for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            smoothed_rms: 0.0,
            smoothed_peak: 0.0,
            long_term_rms: 0.0,
            normalization: 1.0,
            primed: false,
        }
    }

    /// Feed one chunk and return the updated reading
    pub fn process(&mut self, chunk: &[f32]) -> LoudnessReading {
        if chunk.is_empty() {
            return self.reading();
        }

        let mut sum_sq = 0.0f32;
        let mut peak = 0.0f32;
        for &x in chunk {
            sum_sq += x * x;
            peak = peak.max(x.abs());
        }
        let rms = (sum_sq / chunk.len() as f32).sqrt();

        let dt = chunk.len() as f32 / self.sample_rate;
        if !self.primed {
            // First chunk seeds the state instead of smoothing from zero
            self.smoothed_rms = rms;
            self.smoothed_peak = peak;
            self.long_term_rms = rms;
            self.primed = true;
        } else {
            let alpha = 1.0 - (-dt / SMOOTHING_TAU).exp();
            self.smoothed_rms += alpha * (rms - self.smoothed_rms);
            self.smoothed_peak += alpha * (peak - self.smoothed_peak);

            let alpha_lt = 1.0 - (-dt / LONG_TERM_TAU).exp();
            self.long_term_rms += alpha_lt * (rms - self.long_term_rms);
        }

        if self.long_term_rms > 1e-6 {
            let target = (TARGET_LEVEL / (HEADROOM * self.long_term_rms))
                .clamp(MIN_GAIN, MAX_GAIN);
            let alpha_norm = 1.0 - (-dt / NORM_TAU).exp();
            self.normalization += alpha_norm * (target - self.normalization);
        }

        self.reading()
    }

    /// Current figures without feeding new samples
    pub fn reading(&self) -> LoudnessReading {
        LoudnessReading {
            rms: self.smoothed_rms,
            peak: self.smoothed_peak,
            normalization_scalar: self.normalization,
        }
    }

    /// Return to the initial state
    pub fn reset(&mut self) {
        self.smoothed_rms = 0.0;
        self.smoothed_peak = 0.0;
        self.long_term_rms = 0.0;
        self.normalization = 1.0;
        self.primed = false;
    }
}
