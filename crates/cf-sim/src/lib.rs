//! cf-sim: Similarity scoring for CallForge
//!
//! - `dtw` - dynamic time warping over MFCC matrices: full banded
//!   alignment, subsequence matching, and path extraction
//! - `scorer` - combines DTW, offset, mean-along-path, and subsequence
//!   components into a bounded [0, 1] similarity with reliability gating
//!   and finalization semantics

pub mod dtw;
pub mod scorer;

mod error;

pub use dtw::DtwEngine;
pub use error::{SimError, SimResult};
pub use scorer::{
    min_frames_required, ComponentScales, SimilarityComponents, SimilarityScorer,
    RELIABILITY_FLOOR_FRAMES, RELIABILITY_MASTER_FRACTION,
};
