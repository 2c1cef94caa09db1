//! Similarity error types

use thiserror::Error;

/// Alignment and scoring errors
#[derive(Error, Debug)]
pub enum SimError {
    /// One of the feature matrices has zero frames
    #[error("Empty input: both feature sequences need at least one frame")]
    EmptyInput,

    /// Feature matrices with different coefficient counts
    #[error("Dimension mismatch: {a} vs {b} coefficients")]
    DimensionMismatch { a: usize, b: usize },

    /// A second finalization was requested
    #[error("Session analysis already finalized")]
    AlreadyFinalized,
}

/// Result type for similarity operations
pub type SimResult<T> = Result<T, SimError>;
