//! cf-engine: CallForge session engine
//!
//! The transport-agnostic core of the call practice service: a
//! `UnifiedEngine` hosts many concurrent sessions, each ingesting mono
//! PCM chunks, extracting MFCC features, scoring them against a master
//! call with DTW, and running the enhanced pitch/harmonic/cadence/
//! loudness analyzers.
//!
//! ```rust,ignore
//! use cf_core::EngineConfig;
//! use cf_engine::UnifiedEngine;
//!
//! let engine = UnifiedEngine::new(EngineConfig::default())?;
//! let session = engine.create_session(44100)?;
//! engine.load_master_call(session, "buck_grunt")?;
//! for chunk in microphone_chunks {
//!     engine.process_chunk(session, &chunk)?;
//! }
//! engine.finalize_session(session)?;
//! let score = engine.similarity_score(session)?;
//! ```
//!
//! All operations are synchronous and bounded; hosts drive distinct
//! sessions from distinct threads and must serialize calls within a
//! session.

mod enhanced;
mod error;
mod master;
mod session;
mod unified;
mod waveform;

pub use enhanced::EnhancedSummary;
pub use error::{EngineError, EngineResult};
pub use master::MasterCall;
pub use session::{RealtimeState, SessionEngine, SessionId, SessionState, SessionStats};
pub use unified::UnifiedEngine;
pub use waveform::{WaveformBucket, WaveformOverview};

// Re-exported so hosts can configure and inspect without naming the
// lower-level crates directly.
pub use cf_core::{EngineConfig, FeatureMatrix, SimilarityWeights};
pub use cf_sim::SimilarityComponents;
