//! Feature file error types

use thiserror::Error;

/// Feature store errors
#[derive(Error, Debug)]
pub enum FileError {
    /// No feature file exists for the requested call id
    #[error("Master call not found: {0}")]
    NotFound(String),

    /// Header or length inconsistent with the `.mfc` layout
    #[error("Malformed feature file {id}: {reason}")]
    Malformed { id: String, reason: String },

    /// Call id would escape the store directory
    #[error("Invalid call id: {0:?}")]
    InvalidId(String),

    /// Matrix cannot be serialized (empty, or counts overflow the header)
    #[error("Feature matrix not storable: {0}")]
    InvalidMatrix(String),

    /// Underlying filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for feature file operations
pub type FileResult<T> = Result<T, FileError>;
