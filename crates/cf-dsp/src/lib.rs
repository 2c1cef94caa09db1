//! cf-dsp: Streaming DSP for CallForge
//!
//! Frame-level analyzers shared by the session engine:
//! - `fft` - windowed real-to-complex FFT with precomputed tables
//! - `mfcc` - streaming MFCC extraction (pre-emphasis, mel filterbank, DCT)
//! - `pitch` - YIN pitch tracking with vibrato detection
//! - `harmonic` - harmonic peaks, HNR, spectral centroid/bandwidth
//! - `cadence` - onset detection and tempo estimation
//! - `loudness` - RMS/peak metering with normalization tracking
//!
//! All analyzers preallocate their working buffers at construction; the
//! per-frame paths do not allocate.

pub mod cadence;
pub mod fft;
pub mod harmonic;
pub mod loudness;
pub mod mfcc;
pub mod pitch;

mod error;

pub use cadence::{CadenceAnalyzer, CadenceConfig, CadenceReading};
pub use error::{DspError, DspResult};
pub use fft::{FftWindow, WindowedFft, MAX_FFT_SIZE, MIN_FFT_SIZE};
pub use harmonic::{HarmonicAnalyzer, HarmonicConfig, HarmonicReading};
pub use loudness::{LoudnessMonitor, LoudnessReading};
pub use mfcc::{MfccConfig, MfccProcessor};
pub use pitch::{PitchConfig, PitchReading, PitchTracker, VibratoReading};
