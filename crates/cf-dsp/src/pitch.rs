//! YIN pitch tracking
//!
//! Per-frame F0 estimation via the cumulative mean normalized difference
//! function, with parabolic interpolation for sub-sample lag accuracy.
//! A sliding history of voiced estimates feeds vibrato detection: when
//! the recent pitch trajectory fits a sinusoid well enough, the tracker
//! reports its rate and extent.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{DspError, DspResult};

/// Vibrato rate search range (Hz)
const VIBRATO_MIN_RATE: f32 = 3.0;
const VIBRATO_MAX_RATE: f32 = 10.0;

/// Minimum r-squared for a trajectory to count as vibrato
const VIBRATO_MIN_R2: f32 = 0.6;

/// Minimum history span before vibrato detection runs (seconds)
const VIBRATO_MIN_SPAN: f32 = 0.15;

/// Pitch tracking parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchConfig {
    /// Input sample rate (Hz)
    pub sample_rate: u32,
    /// Analysis window in samples
    pub window_size: usize,
    /// Lowest detectable frequency (Hz)
    pub min_freq: f32,
    /// Highest detectable frequency (Hz)
    pub max_freq: f32,
    /// YIN threshold on the normalized difference
    pub threshold: f32,
    /// Seconds of pitch history retained for vibrato analysis
    pub history_secs: f32,
    /// Time step between consecutive `track` calls (seconds)
    pub hop_secs: f32,
}

impl PitchConfig {
    /// Defaults for the given sample rate and framing
    pub fn new(sample_rate: u32, window_size: usize, hop_size: usize) -> Self {
        Self {
            sample_rate,
            window_size,
            min_freq: 80.0,
            max_freq: 2000.0,
            threshold: 0.15,
            history_secs: 1.0,
            hop_secs: hop_size as f32 / sample_rate as f32,
        }
    }
}

/// One pitch estimate. `frequency_hz == 0.0` means unvoiced/no pitch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PitchReading {
    /// Estimated fundamental (Hz), 0 if none found
    pub frequency_hz: f32,
    /// `1 - d'(tau*)`, in [0, 1]
    pub confidence: f32,
}

/// Detected vibrato parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VibratoReading {
    /// Modulation rate (Hz)
    pub rate_hz: f32,
    /// Modulation depth (cents, peak)
    pub extent_cents: f32,
}

/// YIN pitch tracker with vibrato detection
pub struct PitchTracker {
    config: PitchConfig,
    /// Difference function d(tau)
    diff: Vec<f32>,
    /// Cumulative mean normalized difference d'(tau)
    cmnd: Vec<f32>,
    /// Recent estimates in Hz, 0.0 for unvoiced frames
    history: VecDeque<f32>,
    history_cap: usize,
}

impl PitchTracker {
    /// Create a tracker; fails on an empty or inverted frequency range.
    pub fn new(config: PitchConfig) -> DspResult<Self> {
        if config.min_freq <= 0.0 || config.min_freq >= config.max_freq {
            return Err(DspError::InvalidConfig(format!(
                "pitch range [{}, {}] Hz is empty",
                config.min_freq, config.max_freq
            )));
        }
        let max_tau = config.window_size / 2;
        let min_tau_needed = (config.sample_rate as f32 / config.max_freq) as usize;
        if max_tau <= min_tau_needed + 2 {
            return Err(DspError::InvalidConfig(format!(
                "window of {} samples too short for {} Hz minimum lag",
                config.window_size, config.max_freq
            )));
        }
        let history_cap = ((config.history_secs / config.hop_secs).ceil() as usize).max(4);

        Ok(Self {
            diff: vec![0.0; max_tau],
            cmnd: vec![0.0; max_tau],
            history: VecDeque::with_capacity(history_cap),
            history_cap,
            config,
        })
    }

    /// Estimate the pitch of one frame.
    ///
    /// Frames shorter than the window, silent frames, and unvoiced frames
    /// all yield `{0.0, 0.0}` rather than an error.
    pub fn track(&mut self, frame: &[f32]) -> PitchReading {
        if frame.len() < self.config.window_size {
            self.push_history(0.0);
            return PitchReading::default();
        }

        self.difference_function(frame);
        self.cumulative_mean_normalized_difference();

        let min_tau =
            ((self.config.sample_rate as f32 / self.config.max_freq) as usize).max(2);
        let max_tau = ((self.config.sample_rate as f32 / self.config.min_freq) as usize)
            .min(self.cmnd.len() - 1);

        // First dip below threshold wins; walk to its local minimum.
        let mut best_tau = 0;
        let mut best_value = f32::MAX;
        let mut tau = min_tau;
        while tau < max_tau {
            if self.cmnd[tau] < self.config.threshold {
                while tau + 1 < max_tau && self.cmnd[tau + 1] < self.cmnd[tau] {
                    tau += 1;
                }
                best_tau = tau;
                best_value = self.cmnd[tau];
                break;
            }
            tau += 1;
        }

        // No dip under threshold: fall back to the absolute minimum.
        if best_tau == 0 {
            for tau in min_tau..max_tau {
                if self.cmnd[tau] < best_value {
                    best_tau = tau;
                    best_value = self.cmnd[tau];
                }
            }
        }

        if best_tau == 0 || best_value > 0.5 {
            self.push_history(0.0);
            return PitchReading::default();
        }

        let tau_refined = self.parabolic_interpolation(best_tau);
        let frequency = self.config.sample_rate as f32 / tau_refined;
        let confidence = (1.0 - best_value).clamp(0.0, 1.0);

        self.push_history(frequency);
        PitchReading {
            frequency_hz: frequency,
            confidence,
        }
    }

    /// Mean of the voiced estimates currently in the history window
    pub fn f0_mean(&self) -> f32 {
        let voiced: Vec<f32> = self.history.iter().copied().filter(|&f| f > 0.0).collect();
        if voiced.is_empty() {
            0.0
        } else {
            voiced.iter().sum::<f32>() / voiced.len() as f32
        }
    }

    /// Fit a sinusoid to the recent pitch trajectory.
    ///
    /// Returns `None` unless at least 150 ms of mostly voiced history is
    /// available and the fit explains enough variance.
    pub fn vibrato(&self) -> Option<VibratoReading> {
        let min_len = ((VIBRATO_MIN_SPAN / self.config.hop_secs).ceil() as usize).max(4);
        if self.history.len() < min_len {
            return None;
        }

        let voiced: Vec<f32> = self.history.iter().copied().filter(|&f| f > 0.0).collect();
        if voiced.len() < min_len || (voiced.len() as f32) < 0.8 * self.history.len() as f32 {
            return None;
        }

        let mean = voiced.iter().sum::<f32>() / voiced.len() as f32;
        if mean <= 0.0 {
            return None;
        }

        // Trajectory in cents relative to the mean
        let cents: Vec<f32> = voiced
            .iter()
            .map(|&f| 1200.0 * (f / mean).log2())
            .collect();
        let sst: f32 = cents.iter().map(|c| c * c).sum();
        if sst < 1.0 {
            return None; // flat trajectory, nothing to fit
        }

        let dt = self.config.hop_secs;
        let mut best: Option<(f32, f32, f32)> = None; // (rate, extent, r2)

        let mut rate = VIBRATO_MIN_RATE;
        while rate <= VIBRATO_MAX_RATE {
            let omega = 2.0 * std::f32::consts::PI * rate;
            // Least-squares fit of a*sin + b*cos at this rate
            let (mut ss, mut sc, mut cc, mut sy, mut cy) = (0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32);
            for (i, &y) in cents.iter().enumerate() {
                let t = i as f32 * dt;
                let (s, c) = (omega * t).sin_cos();
                ss += s * s;
                sc += s * c;
                cc += c * c;
                sy += s * y;
                cy += c * y;
            }
            let det = ss * cc - sc * sc;
            if det.abs() < 1e-6 {
                rate += 0.25;
                continue;
            }
            let a = (sy * cc - cy * sc) / det;
            let b = (cy * ss - sy * sc) / det;

            let sse: f32 = cents
                .iter()
                .enumerate()
                .map(|(i, &y)| {
                    let t = i as f32 * dt;
                    let (s, c) = (omega * t).sin_cos();
                    let e = y - (a * s + b * c);
                    e * e
                })
                .sum();
            let r2 = 1.0 - sse / sst;
            if best.map_or(true, |(_, _, br2)| r2 > br2) {
                best = Some((rate, (a * a + b * b).sqrt(), r2));
            }
            rate += 0.25;
        }

        match best {
            Some((rate_hz, extent_cents, r2)) if r2 > VIBRATO_MIN_R2 => Some(VibratoReading {
                rate_hz,
                extent_cents,
            }),
            _ => None,
        }
    }

    /// Drop all history and scratch state
    pub fn reset(&mut self) {
        self.history.clear();
        self.diff.fill(0.0);
        self.cmnd.fill(0.0);
    }

    fn push_history(&mut self, frequency: f32) {
        if self.history.len() == self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(frequency);
    }

    fn difference_function(&mut self, frame: &[f32]) {
        let half = self.diff.len();
        for tau in 0..half {
            let mut sum = 0.0f32;
            for j in 0..half {
                let d = frame[j] - frame[j + tau];
                sum += d * d;
            }
            self.diff[tau] = sum;
        }
    }

    fn cumulative_mean_normalized_difference(&mut self) {
        self.cmnd[0] = 1.0;
        let mut running_sum = 0.0f32;
        for tau in 1..self.diff.len() {
            running_sum += self.diff[tau];
            self.cmnd[tau] = if running_sum > 0.0 {
                self.diff[tau] * tau as f32 / running_sum
            } else {
                1.0
            };
        }
    }

    fn parabolic_interpolation(&self, tau: usize) -> f32 {
        if tau == 0 || tau + 1 >= self.cmnd.len() {
            return tau as f32;
        }
        let (y0, y1, y2) = (self.cmnd[tau - 1], self.cmnd[tau], self.cmnd[tau + 1]);
        let denom = y0 - 2.0 * y1 + y2;
        if denom.abs() < 1e-12 {
            return tau as f32;
        }
        let delta = 0.5 * (y0 - y2) / denom;
        tau as f32 + delta.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44100;
    const WINDOW: usize = 2048;

    fn tracker() -> PitchTracker {
        PitchTracker::new(PitchConfig::new(SR, WINDOW, 256)).unwrap()
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin() * 0.6)
            .collect()
    }

    #[test]
    fn test_detects_sine_frequency() {
        let mut t = tracker();
        for &freq in &[110.0f32, 220.0, 440.0, 880.0] {
            let frame = sine(freq, WINDOW);
            let reading = t.track(&frame);
            assert!(
                (reading.frequency_hz - freq).abs() / freq < 0.02,
                "expected ~{freq} Hz, got {}",
                reading.frequency_hz
            );
            assert!(reading.confidence > 0.8);
        }
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let mut t = tracker();
        let reading = t.track(&vec![0.0; WINDOW]);
        assert_eq!(reading.frequency_hz, 0.0);
        assert_eq!(reading.confidence, 0.0);
    }

    #[test]
    fn test_short_frame_is_graceful() {
        let mut t = tracker();
        let reading = t.track(&[0.5; 64]);
        assert_eq!(reading.frequency_hz, 0.0);
    }

    #[test]
    fn test_rejects_empty_range() {
        let mut config = PitchConfig::new(SR, WINDOW, 256);
        config.min_freq = 500.0;
        config.max_freq = 100.0;
        assert!(PitchTracker::new(config).is_err());
    }

    #[test]
    fn test_vibrato_detected_on_modulated_tone() {
        let hop = 256usize;
        let mut t = PitchTracker::new(PitchConfig::new(SR, WINDOW, hop)).unwrap();

        // 440 Hz carrier, 6 Hz vibrato, ~50 cents extent
        let extent = 50.0f32;
        let rate = 6.0f32;
        let total = WINDOW + hop * 80;
        let mut samples = Vec::with_capacity(total);
        let mut phase = 0.0f32;
        for i in 0..total {
            let tsec = i as f32 / SR as f32;
            let cents = extent * (2.0 * std::f32::consts::PI * rate * tsec).sin();
            let freq = 440.0 * (cents / 1200.0).exp2();
            phase += 2.0 * std::f32::consts::PI * freq / SR as f32;
            samples.push(phase.sin() * 0.6);
        }

        for start in (0..=total - WINDOW).step_by(hop) {
            t.track(&samples[start..start + WINDOW]);
        }

        let vibrato = t.vibrato().expect("vibrato should be detected");
        assert!(
            (vibrato.rate_hz - rate).abs() <= 1.0,
            "rate {} vs expected {rate}",
            vibrato.rate_hz
        );
        assert!(
            vibrato.extent_cents > 20.0 && vibrato.extent_cents < 100.0,
            "extent {} out of range",
            vibrato.extent_cents
        );
    }

    #[test]
    fn test_steady_tone_has_no_vibrato() {
        let hop = 256usize;
        let mut t = PitchTracker::new(PitchConfig::new(SR, WINDOW, hop)).unwrap();
        let samples = sine(440.0, WINDOW + hop * 80);
        for start in (0..=samples.len() - WINDOW).step_by(hop) {
            t.track(&samples[start..start + WINDOW]);
        }
        assert!(t.vibrato().is_none());
    }
}
