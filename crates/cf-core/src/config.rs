//! Engine configuration
//!
//! All construction-time knobs live here so transports can deserialize a
//! single config blob and hand it to the engine. Every field has a
//! documented default; `validate` catches inconsistent combinations before
//! any session exists.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

/// Weights for combining similarity components into the overall score.
///
/// Representative defaults; hosts calibrate against a labeled corpus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    /// Coarse timbral offset (distance between matrix means)
    pub offset: f32,
    /// Length-normalized full DTW distance
    pub dtw: f32,
    /// Mean frame distance along the best DTW path
    pub mean: f32,
    /// Subsequence DTW of the session inside the master
    pub subseq: f32,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            offset: 0.15,
            dtw: 0.45,
            mean: 0.15,
            subseq: 0.25,
        }
    }
}

impl SimilarityWeights {
    /// Sum of all weights (used for normalization)
    pub fn total(&self) -> f32 {
        self.offset + self.dtw + self.mean + self.subseq
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrent sessions
    pub max_sessions: usize,

    /// Capacity of the shared master-call feature cache
    pub master_cache_capacity: usize,

    /// Analysis frame length in samples
    pub frame_size: usize,

    /// Hop between consecutive frames in samples
    pub hop_size: usize,

    /// MFCC coefficients kept per frame
    pub num_coeffs: usize,

    /// Mel filterbank size
    pub num_filters: usize,

    /// Sakoe-Chiba band radius for DTW alignment (frames)
    pub dtw_band_radius: usize,

    /// Rescore once this many new frames have accumulated
    pub scoring_cadence_frames: usize,

    /// Component weights for the overall similarity score
    pub similarity_weights: SimilarityWeights,

    /// Enhanced summaries go stale after this much inactivity
    pub enhanced_inactivity_timeout_ms: u64,

    /// Upper bound on the per-session feature window, in seconds of audio.
    /// Older frames are evicted; scoring sees the current window.
    pub max_session_secs: f32,

    /// Largest chunk processed in one slice. Longer chunks are split so
    /// per-session scratch buffers can be preallocated.
    pub max_chunk_len: usize,

    /// Directory holding `.mfc` master feature files
    pub master_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            master_cache_capacity: 32,
            frame_size: 512,
            hop_size: 256,
            num_coeffs: 13,
            num_filters: 26,
            dtw_band_radius: 50,
            scoring_cadence_frames: 4,
            similarity_weights: SimilarityWeights::default(),
            enhanced_inactivity_timeout_ms: 2000,
            max_session_secs: 120.0,
            max_chunk_len: 8192,
            master_dir: PathBuf::from("master_calls"),
        }
    }
}

impl EngineConfig {
    /// Validate field combinations that would break analysis downstream
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_sessions == 0 {
            return Err(CoreError::InvalidConfig("max_sessions must be > 0".into()));
        }
        if self.master_cache_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "master_cache_capacity must be > 0".into(),
            ));
        }
        if !self.frame_size.is_power_of_two() {
            return Err(CoreError::InvalidConfig(format!(
                "frame_size {} is not a power of two",
                self.frame_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(CoreError::InvalidConfig(format!(
                "hop_size {} must be in 1..={}",
                self.hop_size, self.frame_size
            )));
        }
        if self.num_coeffs == 0 || self.num_coeffs > self.num_filters {
            return Err(CoreError::InvalidConfig(format!(
                "num_coeffs {} must be in 1..={}",
                self.num_coeffs, self.num_filters
            )));
        }
        if self.scoring_cadence_frames == 0 {
            return Err(CoreError::InvalidConfig(
                "scoring_cadence_frames must be > 0".into(),
            ));
        }
        if self.similarity_weights.total() <= 0.0 {
            return Err(CoreError::InvalidConfig(
                "similarity weights must sum to a positive value".into(),
            ));
        }
        if self.max_session_secs <= 0.0 {
            return Err(CoreError::InvalidConfig(
                "max_session_secs must be positive".into(),
            ));
        }
        if self.max_chunk_len < self.frame_size {
            return Err(CoreError::InvalidConfig(format!(
                "max_chunk_len {} must be >= frame_size {}",
                self.max_chunk_len, self.frame_size
            )));
        }
        Ok(())
    }
}
