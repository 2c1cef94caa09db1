//! Engine error types
//!
//! Every public engine operation returns `EngineResult`; no panics cross
//! the engine boundary. DSP and file errors are wrapped, except that a
//! repeated finalization surfaces as `AlreadyFinalized` regardless of
//! which layer noticed it.

use cf_core::CoreError;
use cf_dsp::DspError;
use cf_file::FileError;
use cf_sim::SimError;
use thiserror::Error;

use crate::session::SessionId;

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// The session id does not name a live session
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Sample rate outside the supported 8 kHz - 192 kHz range
    #[error("Invalid sample rate: {0} Hz (supported: 8000-192000)")]
    InvalidSampleRate(u32),

    /// The concurrent session cap was hit
    #[error("Session limit reached ({0} live sessions)")]
    LimitExceeded(usize),

    /// Operation not valid in the session's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Chunk rejected before any state changed
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    /// Not enough frames observed for a meaningful score
    #[error("Insufficient data: similarity not yet computed")]
    InsufficientData,

    /// Finalization was already performed
    #[error("Session analysis already finalized")]
    AlreadyFinalized,

    /// Engine configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    /// Internal DSP failure; the affected session is poisoned
    #[error("DSP error: {0}")]
    Dsp(#[from] DspError),

    /// Master feature file problem (not found, malformed)
    #[error("Feature file error: {0}")]
    File(#[from] FileError),

    /// Alignment/scoring failure
    #[error("Similarity error: {0}")]
    Sim(SimError),
}

impl From<SimError> for EngineError {
    fn from(e: SimError) -> Self {
        match e {
            SimError::AlreadyFinalized => EngineError::AlreadyFinalized,
            other => EngineError::Sim(other),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
