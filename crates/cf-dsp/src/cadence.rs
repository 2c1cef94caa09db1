//! Cadence analysis: onsets, tempo, beat times
//!
//! The onset function is spectral flux (half-wave rectified positive
//! magnitude differences between consecutive frames). Onsets are detected
//! incrementally as frames arrive, against an adaptive median + MAD
//! threshold over a one-second sliding window. Tempo comes from
//! autocorrelating the onset envelope; beat times are onset locations
//! snapped to the inferred period.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::fft::{FftWindow, WindowedFft};
use crate::{DspError, DspResult};

/// Adaptive threshold window length (seconds)
const THRESHOLD_WINDOW_SECS: f32 = 1.0;

/// Minimum separation between onsets (seconds)
const MIN_ONSET_GAP_SECS: f32 = 0.05;

/// Inputs shorter than this skip tempo analysis on the fast path (seconds)
const FAST_PATH_MAX_SECS: f32 = 0.2;

/// Frame energy below this level cannot produce an onset
const SILENCE_FLOOR: f32 = 1e-7;

/// Beats snap to an onset within this fraction of the beat period
const BEAT_SNAP_FRACTION: f32 = 0.25;

/// Cadence analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Input sample rate (Hz)
    pub sample_rate: u32,
    /// Spectral frame length in samples (power of two)
    pub frame_size: usize,
    /// Hop between frames in samples
    pub hop_size: usize,
    /// Slowest reportable tempo (BPM)
    pub min_tempo_bpm: f32,
    /// Fastest reportable tempo (BPM)
    pub max_tempo_bpm: f32,
    /// Maximum autocorrelation lag in frames
    pub autocorr_lags: usize,
    /// Absolute floor on the onset function
    pub onset_threshold: f32,
    /// MAD multiplier in the adaptive threshold
    pub adaptive_threshold_factor: f32,
    /// Estimate tempo and beat times
    pub enable_beat_tracking: bool,
    /// Detect onsets at all
    pub enable_onset_detection: bool,
    /// Skip tempo analysis for very short inputs
    pub fast_path_bypass: bool,
    /// Onset envelope retention (seconds)
    pub max_history_secs: f32,
    /// Envelope span fed to the tempo autocorrelation (seconds)
    pub tempo_window_secs: f32,
}

impl CadenceConfig {
    /// Defaults for the given sample rate and framing
    pub fn new(sample_rate: u32, frame_size: usize, hop_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size,
            hop_size,
            min_tempo_bpm: 30.0,
            max_tempo_bpm: 300.0,
            autocorr_lags: 1024,
            onset_threshold: 0.01,
            adaptive_threshold_factor: 1.5,
            enable_beat_tracking: true,
            enable_onset_detection: true,
            fast_path_bypass: true,
            max_history_secs: 60.0,
            tempo_window_secs: 12.0,
        }
    }

    /// Tuned for short isolated calls: grunts, bleats, single notes
    pub fn short_calls(sample_rate: u32, frame_size: usize, hop_size: usize) -> Self {
        Self {
            min_tempo_bpm: 40.0,
            max_tempo_bpm: 480.0,
            adaptive_threshold_factor: 1.2,
            ..Self::new(sample_rate, frame_size, hop_size)
        }
    }

    /// Tuned for long rhythmic sequences: rattling, yelp runs
    pub fn long_sequences(sample_rate: u32, frame_size: usize, hop_size: usize) -> Self {
        Self {
            min_tempo_bpm: 20.0,
            max_tempo_bpm: 240.0,
            tempo_window_secs: 20.0,
            fast_path_bypass: false,
            ..Self::new(sample_rate, frame_size, hop_size)
        }
    }
}

/// Snapshot of the cadence state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceReading {
    /// Detected onset times (seconds from session start)
    pub onset_times: Vec<f32>,
    /// Projected beat times (seconds)
    pub beat_times: Vec<f32>,
    /// Estimated tempo (BPM), 0 when unknown
    pub estimated_tempo_bpm: f32,
    /// Autocorrelation peak strength in [0, 1]
    pub tempo_confidence: f32,
    /// Periodicity of the onset envelope in [0, 1]
    pub rhythm_strength: f32,
    /// Number of detected calls (onsets)
    pub num_calls: usize,
    /// Overall analysis confidence in [0, 1]
    pub confidence: f32,
}

/// Streaming onset/tempo analyzer
pub struct CadenceAnalyzer {
    config: CadenceConfig,
    fft: WindowedFft,
    power: Vec<f32>,
    magnitude: Vec<f32>,
    prev_magnitude: Vec<f32>,
    have_prev: bool,
    /// Onset envelope, one flux value per pushed frame (bounded)
    flux: VecDeque<f32>,
    /// Short-time energy per frame (bounded, parallel to `flux`)
    energy: VecDeque<f32>,
    /// Absolute frame index of `flux[0]`
    base_frame: usize,
    frames_pushed: usize,
    /// Detected onsets as (absolute frame index, flux strength)
    onsets: Vec<(usize, f32)>,
    median_scratch: Vec<f32>,
}

impl CadenceAnalyzer {
    /// Build an analyzer; fails on inconsistent framing or tempo range.
    pub fn new(config: CadenceConfig) -> DspResult<Self> {
        if config.hop_size == 0 || config.hop_size > config.frame_size {
            return Err(DspError::InvalidConfig(format!(
                "hop_size {} must be in 1..=frame_size {}",
                config.hop_size, config.frame_size
            )));
        }
        if config.min_tempo_bpm <= 0.0 || config.min_tempo_bpm >= config.max_tempo_bpm {
            return Err(DspError::InvalidConfig(format!(
                "tempo range [{}, {}] BPM is empty",
                config.min_tempo_bpm, config.max_tempo_bpm
            )));
        }
        let fft = WindowedFft::new(config.frame_size, FftWindow::Hann)?;
        let num_bins = fft.num_bins();
        let window_frames = (THRESHOLD_WINDOW_SECS / config.hop_secs()).ceil() as usize;

        Ok(Self {
            power: vec![0.0; num_bins],
            magnitude: vec![0.0; num_bins],
            prev_magnitude: vec![0.0; num_bins],
            have_prev: false,
            flux: VecDeque::new(),
            energy: VecDeque::new(),
            base_frame: 0,
            frames_pushed: 0,
            onsets: Vec::new(),
            median_scratch: Vec::with_capacity(window_frames),
            config,
            fft,
        })
    }

    /// Feed one frame of `frame_size` samples
    pub fn push_frame(&mut self, frame: &[f32]) -> DspResult<()> {
        self.fft.power_spectrum(frame, &mut self.power)?;
        std::mem::swap(&mut self.magnitude, &mut self.prev_magnitude);
        for (m, &p) in self.magnitude.iter_mut().zip(&self.power) {
            *m = p.sqrt();
        }

        let flux = if self.have_prev {
            self.magnitude
                .iter()
                .zip(&self.prev_magnitude)
                .map(|(&m, &p)| (m - p).max(0.0))
                .sum()
        } else {
            self.have_prev = true;
            0.0
        };

        let energy =
            frame.iter().map(|&x| x * x).sum::<f32>() / frame.len().max(1) as f32;

        self.flux.push_back(flux);
        self.energy.push_back(energy);
        self.frames_pushed += 1;

        if self.config.enable_onset_detection {
            self.evaluate_onset_candidate();
        }

        // Bound the envelope; onsets older than the window go with it.
        let cap = (self.config.max_history_secs / self.config.hop_secs()).ceil() as usize;
        while self.flux.len() > cap.max(16) {
            self.flux.pop_front();
            self.energy.pop_front();
            self.base_frame += 1;
        }
        self.onsets.retain(|&(f, _)| f >= self.base_frame);

        Ok(())
    }

    /// Current analysis over everything pushed so far
    pub fn analysis(&self) -> CadenceReading {
        let hop_secs = self.config.hop_secs();
        let duration = self.flux.len() as f32 * hop_secs;

        let onset_times: Vec<f32> = self
            .onsets
            .iter()
            .map(|&(f, _)| f as f32 * hop_secs)
            .collect();
        let num_calls = onset_times.len();

        // Short input: onset-only stats, no autocorrelation.
        let fast_path = self.config.fast_path_bypass && duration < FAST_PATH_MAX_SECS;
        if fast_path || !self.config.enable_beat_tracking {
            let confidence = if num_calls > 0 { 0.5 } else { 0.0 };
            return CadenceReading {
                onset_times,
                num_calls,
                confidence,
                ..Default::default()
            };
        }

        let (tempo_bpm, tempo_confidence) = self.estimate_tempo();
        let beat_times = self.project_beats(&onset_times, tempo_bpm);

        let onset_presence = (num_calls as f32 / 4.0).min(1.0);
        let rhythm_strength = tempo_confidence * onset_presence;
        let confidence =
            (0.5 * tempo_confidence + 0.5 * onset_presence).clamp(0.0, 1.0);

        CadenceReading {
            onset_times,
            beat_times,
            estimated_tempo_bpm: tempo_bpm,
            tempo_confidence,
            rhythm_strength,
            num_calls,
            confidence,
        }
    }

    /// Forget everything
    pub fn reset(&mut self) {
        self.flux.clear();
        self.energy.clear();
        self.onsets.clear();
        self.base_frame = 0;
        self.frames_pushed = 0;
        self.have_prev = false;
        self.prev_magnitude.fill(0.0);
    }

    fn evaluate_onset_candidate(&mut self) {
        // Candidate is one frame behind the newest (needs one-frame lookahead).
        if self.flux.len() < 3 {
            return;
        }
        let rel = self.flux.len() - 2;
        let value = self.flux[rel];
        if value < self.config.onset_threshold
            || value < self.flux[rel - 1]
            || value <= self.flux[rel + 1]
            || self.energy[rel] < SILENCE_FLOOR
        {
            return;
        }

        // Adaptive threshold: median + factor * MAD over the trailing window
        let window_frames =
            ((THRESHOLD_WINDOW_SECS / self.config.hop_secs()).ceil() as usize).max(4);
        let start = self.flux.len().saturating_sub(window_frames);
        self.median_scratch.clear();
        self.median_scratch.extend(self.flux.iter().skip(start));
        let median = median_in_place(&mut self.median_scratch);
        for v in &mut self.median_scratch {
            *v = (*v - median).abs();
        }
        let mad = median_in_place(&mut self.median_scratch);
        if value <= median + self.config.adaptive_threshold_factor * mad {
            return;
        }

        let abs_frame = self.base_frame + rel;
        let min_gap =
            ((MIN_ONSET_GAP_SECS / self.config.hop_secs()).round() as usize).max(1);
        match self.onsets.last().copied() {
            Some((last_frame, last_strength)) if abs_frame < last_frame + min_gap => {
                // Too close: keep whichever onset is stronger
                if value > last_strength {
                    *self.onsets.last_mut().unwrap() = (abs_frame, value);
                }
            }
            _ => self.onsets.push((abs_frame, value)),
        }
    }

    fn estimate_tempo(&self) -> (f32, f32) {
        let hop_secs = self.config.hop_secs();
        let window = ((self.config.tempo_window_secs / hop_secs) as usize).max(8);
        let start = self.flux.len().saturating_sub(window);
        let env: Vec<f32> = self.flux.iter().skip(start).copied().collect();
        if env.len() < 8 {
            return (0.0, 0.0);
        }

        let mean = env.iter().sum::<f32>() / env.len() as f32;
        let centered: Vec<f32> = env.iter().map(|&v| v - mean).collect();
        let r0: f32 = centered.iter().map(|&v| v * v).sum();
        if r0 <= 0.0 {
            return (0.0, 0.0);
        }

        let lag_min = ((60.0 / self.config.max_tempo_bpm / hop_secs).ceil() as usize).max(1);
        let lag_max = ((60.0 / self.config.min_tempo_bpm / hop_secs).floor() as usize)
            .min(self.config.autocorr_lags)
            .min(centered.len() - 1);
        if lag_min >= lag_max {
            return (0.0, 0.0);
        }

        let mut best_lag = 0;
        let mut best_r = 0.0f32;
        for lag in lag_min..=lag_max {
            let r: f32 = centered[lag..]
                .iter()
                .zip(&centered[..centered.len() - lag])
                .map(|(&a, &b)| a * b)
                .sum();
            if r > best_r {
                best_r = r;
                best_lag = lag;
            }
        }
        if best_lag == 0 {
            return (0.0, 0.0);
        }

        let tempo = 60.0 / (best_lag as f32 * hop_secs);
        let confidence = (best_r / r0).clamp(0.0, 1.0);
        (tempo, confidence)
    }

    fn project_beats(&self, onset_times: &[f32], tempo_bpm: f32) -> Vec<f32> {
        if tempo_bpm <= 0.0 || onset_times.is_empty() {
            return Vec::new();
        }
        let period = 60.0 / tempo_bpm;
        let t0 = onset_times[0];
        let end = self.flux.len() as f32 * self.config.hop_secs()
            + self.base_frame as f32 * self.config.hop_secs();

        let mut beats = Vec::new();
        let mut t = t0;
        while t <= end + 1e-6 {
            // Snap to the nearest onset when one is close enough
            let snapped = onset_times
                .iter()
                .copied()
                .filter(|&o| (o - t).abs() <= BEAT_SNAP_FRACTION * period)
                .min_by(|a, b| (a - t).abs().total_cmp(&(b - t).abs()));
            beats.push(snapped.unwrap_or(t));
            t += period;
        }
        beats
    }
}

impl CadenceConfig {
    #[inline]
    fn hop_secs(&self) -> f32 {
        self.hop_size as f32 / self.sample_rate as f32
    }
}

/// Median by sorting the scratch buffer in place
fn median_in_place(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}
