//! Enhanced analysis summary
//!
//! The latest pitch/harmonic/cadence/loudness figures for a session,
//! refreshed whenever a chunk produces analysis frames. `valid` is the
//! tag: after enabling, after a reset, and after two seconds without
//! audio the values are returned as advisory with `valid == false`.

use serde::{Deserialize, Serialize};

/// Latest enhanced analyzer figures for one session
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EnhancedSummary {
    /// False while the values are stale or not yet populated
    pub valid: bool,

    /// Most recent pitch estimate (Hz), 0 when unvoiced
    pub pitch_hz: f32,
    /// Confidence of the pitch estimate in [0, 1]
    pub pitch_confidence: f32,
    /// Mean F0 over the recent voiced history (Hz)
    pub f0_mean: f32,
    /// Detected vibrato rate (Hz), 0 when absent
    pub vibrato_rate_hz: f32,
    /// Detected vibrato extent (cents, peak), 0 when absent
    pub vibrato_extent_cents: f32,

    /// Harmonic-to-noise ratio of the latest window
    pub harmonicity: f32,
    /// Spectral centroid (Hz)
    pub spectral_centroid: f32,
    /// Spectral bandwidth (Hz)
    pub spectral_bandwidth: f32,

    /// Estimated tempo (BPM), 0 when unknown
    pub tempo_bpm: f32,
    /// Periodicity strength of the onset envelope in [0, 1]
    pub rhythm_strength: f32,
    /// Detected call count (onsets) in the retained window
    pub num_calls: usize,

    /// Smoothed RMS level
    pub rms: f32,
    /// Smoothed absolute peak
    pub peak: f32,
    /// Gain steering the signal toward the target level
    pub normalization_scalar: f32,

    /// Milliseconds since session creation when values were computed
    pub computed_at_ms: u64,
}
