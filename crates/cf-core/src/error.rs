//! Shared error types

use thiserror::Error;

/// Errors raised by the shared core types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Feature rows with different coefficient counts were combined
    #[error("Dimension mismatch: expected {expected} coefficients, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Raw feature data does not divide evenly into rows
    #[error("Feature data of {len} values is not a multiple of {num_coeffs} coefficients")]
    RaggedData { len: usize, num_coeffs: usize },
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;
