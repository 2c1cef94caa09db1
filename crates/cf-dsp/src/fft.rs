//! Windowed real-to-complex FFT
//!
//! Thin wrapper around `realfft` that owns the analysis window and the
//! scratch buffers, so callers get a zero-allocation `process` once the
//! transform is planned.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::{DspError, DspResult};

/// Minimum supported FFT size
pub const MIN_FFT_SIZE: usize = 256;

/// Maximum supported FFT size
pub const MAX_FFT_SIZE: usize = 16384;

/// Analysis window shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FftWindow {
    /// Hann (raised cosine), the default
    #[default]
    Hann,
    /// Hamming
    Hamming,
    /// Blackman
    Blackman,
}

impl FftWindow {
    /// Compute periodic window coefficients of the given length
    pub fn coefficients(self, size: usize) -> Vec<f32> {
        let n = size as f32;
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / n;
                match self {
                    FftWindow::Hann => 0.5 * (1.0 - phase.cos()),
                    FftWindow::Hamming => 0.54 - 0.46 * phase.cos(),
                    FftWindow::Blackman => {
                        0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                    }
                }
            })
            .collect()
    }
}

/// Real-to-complex FFT with a precomputed analysis window.
///
/// The input is multiplied element-wise by the window before the
/// transform. Window coefficients and twiddles are computed once at
/// construction.
pub struct WindowedFft {
    size: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    scratch_windowed: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
}

impl WindowedFft {
    /// Plan a transform of the given size.
    ///
    /// Fails with `InvalidSize` unless `size` is a power of two in
    /// [`MIN_FFT_SIZE`, `MAX_FFT_SIZE`].
    pub fn new(size: usize, window: FftWindow) -> DspResult<Self> {
        if !size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&size) {
            return Err(DspError::InvalidSize(size));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let num_bins = size / 2 + 1;

        Ok(Self {
            size,
            fft,
            window: window.coefficients(size),
            scratch_windowed: vec![0.0; size],
            spectrum: vec![Complex::new(0.0, 0.0); num_bins],
        })
    }

    /// Transform size
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of complex output bins (`size / 2 + 1`)
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Window the input and transform into `spectrum`.
    ///
    /// `input` must hold exactly `size` samples and `spectrum` exactly
    /// `num_bins` values.
    pub fn process(&mut self, input: &[f32], spectrum: &mut [Complex<f32>]) -> DspResult<()> {
        if input.len() != self.size {
            return Err(DspError::InputTooShort {
                got: input.len(),
                need: self.size,
            });
        }
        if spectrum.len() != self.num_bins() {
            return Err(DspError::FftFailure(format!(
                "spectrum buffer holds {} bins, expected {}",
                spectrum.len(),
                self.num_bins()
            )));
        }

        for (dst, (&x, &w)) in self
            .scratch_windowed
            .iter_mut()
            .zip(input.iter().zip(&self.window))
        {
            *dst = x * w;
        }

        self.fft
            .process(&mut self.scratch_windowed, spectrum)
            .map_err(|e| DspError::FftFailure(e.to_string()))
    }

    /// Windowed power spectrum `|X[k]|^2` into `power`.
    ///
    /// `power` must hold `num_bins` values.
    pub fn power_spectrum(&mut self, input: &[f32], power: &mut [f32]) -> DspResult<()> {
        if power.len() != self.num_bins() {
            return Err(DspError::FftFailure(format!(
                "power buffer holds {} bins, expected {}",
                power.len(),
                self.num_bins()
            )));
        }

        // Split borrow: the spectrum scratch cannot alias the window scratch.
        let mut spectrum = std::mem::take(&mut self.spectrum);
        let result = self.process(input, &mut spectrum);
        for (p, c) in power.iter_mut().zip(&spectrum) {
            *p = c.norm_sqr();
        }
        self.spectrum = spectrum;
        result
    }
}
