//! Error types for DSP components

use thiserror::Error;

/// DSP component errors
#[derive(Debug, Error)]
pub enum DspError {
    /// FFT size outside the supported power-of-two range
    #[error("Invalid FFT size: {0} (must be a power of two in [256, 16384])")]
    InvalidSize(usize),

    /// Analyzer configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame shorter than the analyzer requires
    #[error("Input too short: {got} samples, need at least {need}")]
    InputTooShort { got: usize, need: usize },

    /// The underlying FFT reported a failure
    #[error("FFT error: {0}")]
    FftFailure(String),
}

/// Result type for DSP operations
pub type DspResult<T> = Result<T, DspError>;
