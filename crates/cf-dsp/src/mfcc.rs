//! Streaming MFCC extraction
//!
//! Per frame: pre-emphasis, window, power spectrum, triangular mel
//! filterbank, log with floor, orthonormal DCT-II. Coefficient 0 is
//! replaced by the per-frame log-energy (mean of the log filter outputs).
//!
//! The processor is streaming: `push_samples` accepts arbitrary chunk
//! sizes and emits one feature row per `hop_size` advance. Pre-emphasis
//! state is carried across frames, so feeding a buffer in chunks yields
//! the same rows as feeding it whole.

use cf_core::{EngineConfig, FeatureMatrix};
use serde::{Deserialize, Serialize};

use crate::fft::{FftWindow, WindowedFft};
use crate::{DspError, DspResult};

/// Pre-emphasis coefficient: y[n] = x[n] - 0.97 x[n-1]
const PRE_EMPHASIS: f32 = 0.97;

/// Floor applied before the log of each filter energy
const LOG_FLOOR: f32 = 1e-10;

/// Convert Hz to mel (HTK formula)
#[inline]
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Convert mel to Hz
#[inline]
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// MFCC extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfccConfig {
    /// Input sample rate (Hz)
    pub sample_rate: u32,
    /// Analysis frame length in samples (power of two)
    pub frame_size: usize,
    /// Hop between frames in samples
    pub hop_size: usize,
    /// Cepstral coefficients kept per frame
    pub num_coeffs: usize,
    /// Mel filterbank size
    pub num_filters: usize,
    /// Lower edge of the filterbank (Hz)
    pub low_freq_hz: f32,
    /// Upper edge of the filterbank (Hz)
    pub high_freq_hz: f32,
    /// Analysis window shape
    pub window: FftWindow,
}

impl MfccConfig {
    /// Default analysis parameters for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame_size: 512,
            hop_size: 256,
            num_coeffs: 13,
            num_filters: 26,
            low_freq_hz: 20.0,
            high_freq_hz: sample_rate as f32 / 2.0,
            window: FftWindow::Hann,
        }
    }

    /// Derive MFCC parameters from the engine configuration
    pub fn from_engine(config: &EngineConfig, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame_size: config.frame_size,
            hop_size: config.hop_size,
            num_coeffs: config.num_coeffs,
            num_filters: config.num_filters,
            ..Self::new(sample_rate)
        }
    }

    /// Wider 2048-sample frames for low-pitched, slowly evolving calls
    pub fn wideband(sample_rate: u32) -> Self {
        Self {
            frame_size: 2048,
            hop_size: 1024,
            num_filters: 40,
            ..Self::new(sample_rate)
        }
    }

    /// Validate parameter combinations
    pub fn validate(&self) -> DspResult<()> {
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(DspError::InvalidConfig(format!(
                "hop_size {} must be in 1..=frame_size {}",
                self.hop_size, self.frame_size
            )));
        }
        if self.num_coeffs == 0 || self.num_coeffs > self.num_filters {
            return Err(DspError::InvalidConfig(format!(
                "num_coeffs {} must be in 1..=num_filters {}",
                self.num_coeffs, self.num_filters
            )));
        }
        if self.low_freq_hz < 0.0 || self.low_freq_hz >= self.high_freq_hz {
            return Err(DspError::InvalidConfig(format!(
                "filterbank band [{}, {}] Hz is empty",
                self.low_freq_hz, self.high_freq_hz
            )));
        }
        if self.high_freq_hz > self.sample_rate as f32 / 2.0 {
            return Err(DspError::InvalidConfig(format!(
                "high_freq_hz {} exceeds Nyquist {}",
                self.high_freq_hz,
                self.sample_rate as f32 / 2.0
            )));
        }
        Ok(())
    }
}

/// One triangular mel filter, stored sparsely as a bin offset plus weights
struct MelFilter {
    first_bin: usize,
    weights: Vec<f32>,
}

impl MelFilter {
    #[inline]
    fn apply(&self, power: &[f32]) -> f32 {
        self.weights
            .iter()
            .zip(&power[self.first_bin..])
            .map(|(&w, &p)| w * p)
            .sum()
    }
}

/// Streaming MFCC processor
pub struct MfccProcessor {
    config: MfccConfig,
    fft: WindowedFft,
    filterbank: Vec<MelFilter>,
    /// Orthonormal DCT-II matrix, `num_coeffs` x `num_filters` row-major
    dct: Vec<f32>,
    power: Vec<f32>,
    log_energies: Vec<f32>,
    coeffs: Vec<f32>,
    /// Pre-emphasized samples awaiting framing
    pending: Vec<f32>,
    preemph_prev: f32,
}

impl MfccProcessor {
    /// Build a processor; fails with `InvalidConfig` / `InvalidSize` on
    /// inconsistent parameters.
    pub fn new(config: MfccConfig) -> DspResult<Self> {
        config.validate()?;
        let fft = WindowedFft::new(config.frame_size, config.window)?;
        let num_bins = fft.num_bins();
        let filterbank = build_filterbank(&config, num_bins);
        let dct = build_dct(config.num_coeffs, config.num_filters);
        log::debug!(
            "mfcc configured: {} Hz, frame {}, hop {}, {} filters -> {} coeffs",
            config.sample_rate,
            config.frame_size,
            config.hop_size,
            config.num_filters,
            config.num_coeffs
        );

        Ok(Self {
            power: vec![0.0; num_bins],
            log_energies: vec![0.0; config.num_filters],
            coeffs: vec![0.0; config.num_coeffs],
            pending: Vec::with_capacity(config.frame_size * 4),
            preemph_prev: 0.0,
            config,
            fft,
            filterbank,
            dct,
        })
    }

    /// Extraction parameters
    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Append samples and emit completed feature rows into `out`.
    ///
    /// Returns the number of rows emitted. `out` must have the same row
    /// width as `num_coeffs`.
    pub fn push_samples(&mut self, samples: &[f32], out: &mut FeatureMatrix) -> DspResult<usize> {
        // Pre-emphasize into the backlog; state carries across calls.
        self.pending.reserve(samples.len());
        for &x in samples {
            self.pending.push(x - PRE_EMPHASIS * self.preemph_prev);
            self.preemph_prev = x;
        }

        let frame = self.config.frame_size;
        let hop = self.config.hop_size;
        let mut emitted = 0;

        while self.pending.len() >= frame {
            compute_row(
                &mut self.fft,
                &self.filterbank,
                &self.dct,
                &self.pending[..frame],
                &mut self.power,
                &mut self.log_energies,
                &mut self.coeffs,
            )?;
            out.push_row(&self.coeffs).map_err(|e| {
                DspError::InvalidConfig(format!("feature sink rejected row: {e}"))
            })?;
            emitted += 1;

            let remaining = self.pending.len() - hop;
            self.pending.copy_within(hop.., 0);
            self.pending.truncate(remaining);
        }

        Ok(emitted)
    }

    /// Analyze a complete buffer from a clean state.
    ///
    /// Convenience path for master-call analysis and tests; trailing
    /// samples shorter than a frame are dropped, matching the streaming
    /// path.
    pub fn analyze(&mut self, samples: &[f32]) -> DspResult<FeatureMatrix> {
        self.reset();
        let expected = if samples.len() >= self.config.frame_size {
            (samples.len() - self.config.frame_size) / self.config.hop_size + 1
        } else {
            0
        };
        let mut out = FeatureMatrix::with_capacity(self.config.num_coeffs, expected);
        self.push_samples(samples, &mut out)?;
        Ok(out)
    }

    /// Emit one final zero-padded frame from the residual backlog.
    ///
    /// Residuals shorter than a hop are discarded. Returns the number of
    /// rows emitted (0 or 1); the backlog is empty afterwards either way.
    pub fn flush(&mut self, out: &mut FeatureMatrix) -> DspResult<usize> {
        if self.pending.len() < self.config.hop_size {
            self.pending.clear();
            return Ok(0);
        }
        // push_samples drained every full frame, so this is a partial one
        self.pending.resize(self.config.frame_size, 0.0);
        compute_row(
            &mut self.fft,
            &self.filterbank,
            &self.dct,
            &self.pending,
            &mut self.power,
            &mut self.log_energies,
            &mut self.coeffs,
        )?;
        out.push_row(&self.coeffs)
            .map_err(|e| DspError::InvalidConfig(format!("feature sink rejected row: {e}")))?;
        self.pending.clear();
        Ok(1)
    }

    /// Clear the backlog and pre-emphasis state
    pub fn reset(&mut self) {
        self.pending.clear();
        self.preemph_prev = 0.0;
    }
}

/// Compute one MFCC row from a pre-emphasized frame into `coeffs`
fn compute_row(
    fft: &mut WindowedFft,
    filterbank: &[MelFilter],
    dct: &[f32],
    frame: &[f32],
    power: &mut [f32],
    log_energies: &mut [f32],
    coeffs: &mut [f32],
) -> DspResult<()> {
    fft.power_spectrum(frame, power)?;

    for (e, filter) in log_energies.iter_mut().zip(filterbank) {
        *e = filter.apply(power).max(LOG_FLOOR).ln();
    }

    let num_filters = filterbank.len();
    for (k, c) in coeffs.iter_mut().enumerate() {
        let row = &dct[k * num_filters..(k + 1) * num_filters];
        *c = row
            .iter()
            .zip(log_energies.iter())
            .map(|(&d, &e)| d * e)
            .sum();
    }

    // Coefficient 0 carries the frame log-energy instead of the DC term.
    coeffs[0] = log_energies.iter().sum::<f32>() / num_filters as f32;
    Ok(())
}

/// Build the triangular mel filterbank over `num_bins` FFT bins
fn build_filterbank(config: &MfccConfig, num_bins: usize) -> Vec<MelFilter> {
    let mel_lo = hz_to_mel(config.low_freq_hz);
    let mel_hi = hz_to_mel(config.high_freq_hz);
    let n = config.num_filters;

    // num_filters + 2 edge points, evenly spaced in mel, mapped to bins
    let bin_of = |i: usize| -> f32 {
        let mel = mel_lo + (mel_hi - mel_lo) * i as f32 / (n + 1) as f32;
        mel_to_hz(mel) * config.frame_size as f32 / config.sample_rate as f32
    };

    let mut filters = Vec::with_capacity(n);
    for i in 0..n {
        let left = bin_of(i);
        let center = bin_of(i + 1);
        let right = bin_of(i + 2);

        let first_bin = (left.ceil() as usize).min(num_bins.saturating_sub(1));
        let last_bin = (right.floor() as usize).min(num_bins.saturating_sub(1));
        let mut weights = Vec::with_capacity(last_bin.saturating_sub(first_bin) + 1);

        for bin in first_bin..=last_bin {
            let b = bin as f32;
            let w = if b <= center && center - left > 1e-6 {
                (b - left) / (center - left)
            } else if b > center && right - center > 1e-6 {
                (right - b) / (right - center)
            } else {
                0.0
            };
            weights.push(w.max(0.0));
        }

        filters.push(MelFilter { first_bin, weights });
    }
    filters
}

/// Orthonormal DCT-II matrix, `num_coeffs` rows of `num_filters` values
fn build_dct(num_coeffs: usize, num_filters: usize) -> Vec<f32> {
    let n = num_filters as f32;
    let mut dct = Vec::with_capacity(num_coeffs * num_filters);
    for k in 0..num_coeffs {
        let norm = if k == 0 {
            (1.0 / n).sqrt()
        } else {
            (2.0 / n).sqrt()
        };
        for i in 0..num_filters {
            let angle =
                std::f32::consts::PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n);
            dct.push(norm * angle.cos());
        }
    }
    dct
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5
            })
            .collect()
    }

    #[test]
    fn test_mel_mapping_round_trip() {
        for hz in [20.0f32, 150.0, 1000.0, 8000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            approx::assert_relative_eq!(back, hz, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_rejects_hop_above_frame() {
        let config = MfccConfig {
            hop_size: 1024,
            ..MfccConfig::new(44100)
        };
        assert!(MfccProcessor::new(config).is_err());
    }

    #[test]
    fn test_rejects_more_coeffs_than_filters() {
        let config = MfccConfig {
            num_coeffs: 30,
            ..MfccConfig::new(44100)
        };
        assert!(MfccProcessor::new(config).is_err());
    }

    #[test]
    fn test_frame_count_matches_hop_arithmetic() {
        let config = MfccConfig::new(44100);
        let mut proc = MfccProcessor::new(config.clone()).unwrap();
        let samples = tone(440.0, 44100, 4096);
        let features = proc.analyze(&samples).unwrap();

        let expected = (4096 - config.frame_size) / config.hop_size + 1;
        assert_eq!(features.num_frames(), expected);
        assert_eq!(features.num_coeffs(), config.num_coeffs);
    }

    #[test]
    fn test_chunked_feed_matches_batch() {
        let config = MfccConfig::new(44100);
        let samples = tone(600.0, 44100, 8000);

        let mut batch_proc = MfccProcessor::new(config.clone()).unwrap();
        let batch = batch_proc.analyze(&samples).unwrap();

        let mut stream_proc = MfccProcessor::new(config.clone()).unwrap();
        let mut streamed = FeatureMatrix::new(config.num_coeffs);
        for chunk in samples.chunks(333) {
            stream_proc.push_samples(chunk, &mut streamed).unwrap();
        }

        assert_eq!(batch.num_frames(), streamed.num_frames());
        for (a, b) in batch.rows().zip(streamed.rows()) {
            for (&x, &y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-4, "{x} vs {y}");
            }
        }
    }

    #[test]
    fn test_distinct_tones_produce_distinct_features() {
        let mut proc = MfccProcessor::new(MfccConfig::new(44100)).unwrap();
        let low = proc.analyze(&tone(220.0, 44100, 8192)).unwrap();
        let high = proc.analyze(&tone(3000.0, 44100, 8192)).unwrap();

        let lo_mean = low.mean_vector();
        let hi_mean = high.mean_vector();
        let dist: f32 = lo_mean
            .iter()
            .zip(&hi_mean)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        assert!(dist > 1.0, "tones too close in MFCC space: {dist}");
    }

    #[test]
    fn test_short_buffer_yields_no_frames() {
        let mut proc = MfccProcessor::new(MfccConfig::new(44100)).unwrap();
        let features = proc.analyze(&[0.1; 100]).unwrap();
        assert!(features.is_empty());
    }
}
