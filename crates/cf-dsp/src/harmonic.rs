//! Harmonic structure analysis
//!
//! FFT-based per-window analysis:
//! - spectral peak picking with parabolic interpolation
//! - fundamental estimation and harmonic matching at k*f0
//! - harmonic-to-noise ratio
//! - spectral centroid and bandwidth

use serde::{Deserialize, Serialize};

use crate::fft::{FftWindow, WindowedFft};
use crate::{DspError, DspResult};

/// Harmonic analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicConfig {
    /// Input sample rate (Hz)
    pub sample_rate: u32,
    /// FFT size (power of two); shorter frames are zero-padded
    pub fft_size: usize,
    /// Harmonics searched above the fundamental
    pub max_harmonics: usize,
    /// Lowest admissible fundamental (Hz)
    pub min_freq: f32,
    /// Highest frequency considered for peaks (Hz)
    pub max_freq: f32,
    /// Peaks below this level relative to the frame maximum are ignored (dB)
    pub noise_floor_db: f32,
    /// Harmonic match tolerance as a fraction of k*f0
    pub harmonic_tolerance: f32,
    /// Analysis window shape
    pub window: FftWindow,
}

impl HarmonicConfig {
    /// Defaults for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fft_size: 2048,
            max_harmonics: 8,
            min_freq: 60.0,
            max_freq: 5000.0,
            noise_floor_db: -50.0,
            harmonic_tolerance: 0.1,
            window: FftWindow::Hann,
        }
    }
}

/// Result of analyzing one window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarmonicReading {
    /// Estimated fundamental (Hz), 0 if none found
    pub fundamental_freq: f32,
    /// Located harmonic frequencies, fundamental first
    pub harmonic_freqs: Vec<f32>,
    /// Linear magnitudes matching `harmonic_freqs`
    pub harmonic_magnitudes: Vec<f32>,
    /// Harmonic power over non-harmonic power
    pub harmonic_to_noise_ratio: f32,
    /// First spectral moment (Hz)
    pub spectral_centroid: f32,
    /// Second spectral moment (Hz)
    pub spectral_bandwidth: f32,
    /// Detection confidence in [0, 1]
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy)]
struct SpectralPeak {
    freq: f32,
    magnitude: f32,
    bin: usize,
}

/// FFT-based harmonic analyzer
pub struct HarmonicAnalyzer {
    config: HarmonicConfig,
    fft: WindowedFft,
    padded: Vec<f32>,
    power: Vec<f32>,
    magnitude: Vec<f32>,
    peaks: Vec<SpectralPeak>,
}

impl HarmonicAnalyzer {
    /// Build an analyzer; fails on an invalid FFT size or frequency range.
    pub fn new(config: HarmonicConfig) -> DspResult<Self> {
        if config.min_freq <= 0.0 || config.min_freq >= config.max_freq {
            return Err(DspError::InvalidConfig(format!(
                "frequency range [{}, {}] Hz is empty",
                config.min_freq, config.max_freq
            )));
        }
        if config.max_harmonics == 0 {
            return Err(DspError::InvalidConfig(
                "max_harmonics must be at least 1".into(),
            ));
        }
        let fft = WindowedFft::new(config.fft_size, config.window)?;
        let num_bins = fft.num_bins();

        Ok(Self {
            padded: vec![0.0; config.fft_size],
            power: vec![0.0; num_bins],
            magnitude: vec![0.0; num_bins],
            peaks: Vec::with_capacity(64),
            config,
            fft,
        })
    }

    /// Analyze one window of samples.
    ///
    /// Windows shorter than the FFT size are zero-padded; windows longer
    /// than it are rejected.
    pub fn analyze(&mut self, frame: &[f32]) -> DspResult<HarmonicReading> {
        if frame.len() > self.config.fft_size {
            return Err(DspError::InvalidConfig(format!(
                "frame of {} samples exceeds fft_size {}",
                frame.len(),
                self.config.fft_size
            )));
        }

        self.padded[..frame.len()].copy_from_slice(frame);
        self.padded[frame.len()..].fill(0.0);
        self.fft.power_spectrum(&self.padded, &mut self.power)?;

        for (m, &p) in self.magnitude.iter_mut().zip(&self.power) {
            *m = p.sqrt();
        }

        let bin_hz = self.config.sample_rate as f32 / self.config.fft_size as f32;
        let (centroid, bandwidth) = spectral_moments(&self.magnitude, bin_hz);

        self.find_peaks(bin_hz);
        if self.peaks.is_empty() {
            return Ok(HarmonicReading {
                spectral_centroid: centroid,
                spectral_bandwidth: bandwidth,
                ..Default::default()
            });
        }

        let fundamental = match self.estimate_fundamental() {
            Some(f) => f,
            None => {
                return Ok(HarmonicReading {
                    spectral_centroid: centroid,
                    spectral_bandwidth: bandwidth,
                    ..Default::default()
                });
            }
        };

        let mut harmonic_freqs = vec![fundamental.freq];
        let mut harmonic_magnitudes = vec![fundamental.magnitude];
        let mut harmonic_bins = vec![fundamental.bin];

        for k in 2..=self.config.max_harmonics {
            let target = fundamental.freq * k as f32;
            if target > self.config.max_freq.min(self.nyquist()) {
                break;
            }
            let tolerance = target * self.config.harmonic_tolerance;
            if let Some(peak) = self
                .peaks
                .iter()
                .filter(|p| (p.freq - target).abs() <= tolerance)
                .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
            {
                harmonic_freqs.push(peak.freq);
                harmonic_magnitudes.push(peak.magnitude);
                harmonic_bins.push(peak.bin);
            }
        }

        let hnr = self.harmonic_to_noise(&harmonic_bins);
        let found_frac = harmonic_freqs.len() as f32 / self.config.max_harmonics as f32;
        let confidence = (0.5 * found_frac + 0.5 * hnr / (hnr + 1.0)).clamp(0.0, 1.0);

        Ok(HarmonicReading {
            fundamental_freq: fundamental.freq,
            harmonic_freqs,
            harmonic_magnitudes,
            harmonic_to_noise_ratio: hnr,
            spectral_centroid: centroid,
            spectral_bandwidth: bandwidth,
            confidence,
        })
    }

    fn nyquist(&self) -> f32 {
        self.config.sample_rate as f32 / 2.0
    }

    /// Local maxima above the relative noise floor, with parabolic
    /// frequency refinement
    fn find_peaks(&mut self, bin_hz: f32) {
        self.peaks.clear();
        let max_mag = self.magnitude.iter().cloned().fold(0.0f32, f32::max);
        if max_mag <= 0.0 {
            return;
        }
        let floor = max_mag * 10.0f32.powf(self.config.noise_floor_db / 20.0);
        let max_bin =
            ((self.config.max_freq / bin_hz) as usize).min(self.magnitude.len() - 2);

        for bin in 1..=max_bin {
            let m = self.magnitude[bin];
            if m < floor || m <= self.magnitude[bin - 1] || m <= self.magnitude[bin + 1] {
                continue;
            }
            // Parabolic interpolation on log magnitudes
            let (y0, y1, y2) = (
                self.magnitude[bin - 1].max(1e-12).ln(),
                m.max(1e-12).ln(),
                self.magnitude[bin + 1].max(1e-12).ln(),
            );
            let denom = y0 - 2.0 * y1 + y2;
            let delta = if denom.abs() > 1e-9 {
                (0.5 * (y0 - y2) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            };
            self.peaks.push(SpectralPeak {
                freq: (bin as f32 + delta) * bin_hz,
                magnitude: m,
                bin,
            });
        }
    }

    /// Lowest strong peak within the admissible fundamental range
    fn estimate_fundamental(&self) -> Option<SpectralPeak> {
        let strongest = self
            .peaks
            .iter()
            .map(|p| p.magnitude)
            .fold(0.0f32, f32::max);
        self.peaks
            .iter()
            .filter(|p| {
                p.freq >= self.config.min_freq
                    && p.freq <= self.config.max_freq
                    && p.magnitude >= 0.1 * strongest
            })
            .min_by(|a, b| a.freq.total_cmp(&b.freq))
            .copied()
    }

    /// Power near harmonic bins over power everywhere else (DC excluded)
    fn harmonic_to_noise(&self, harmonic_bins: &[usize]) -> f32 {
        let mut harmonic = 0.0f32;
        let mut noise = 0.0f32;
        for (bin, &p) in self.power.iter().enumerate().skip(1) {
            let is_harmonic = harmonic_bins
                .iter()
                .any(|&h| bin >= h.saturating_sub(2) && bin <= h + 2);
            if is_harmonic {
                harmonic += p;
            } else {
                noise += p;
            }
        }
        if noise <= 0.0 {
            return if harmonic > 0.0 { f32::MAX } else { 0.0 };
        }
        harmonic / noise
    }
}

/// Spectral centroid and bandwidth over a magnitude spectrum
fn spectral_moments(magnitude: &[f32], bin_hz: f32) -> (f32, f32) {
    let total: f32 = magnitude.iter().sum();
    if total <= 0.0 {
        return (0.0, 0.0);
    }
    let centroid = magnitude
        .iter()
        .enumerate()
        .map(|(i, &m)| i as f32 * bin_hz * m)
        .sum::<f32>()
        / total;
    let variance = magnitude
        .iter()
        .enumerate()
        .map(|(i, &m)| {
            let d = i as f32 * bin_hz - centroid;
            d * d * m
        })
        .sum::<f32>()
        / total;
    (centroid, variance.sqrt())
}
