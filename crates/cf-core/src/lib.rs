//! cf-core: Shared types and configuration for CallForge
//!
//! This crate provides the foundational types used across all CallForge
//! crates:
//! - `FeatureMatrix` - row-major MFCC feature sequences
//! - `EngineConfig` - engine-wide construction-time configuration
//! - `CoreError` - shared validation errors

mod config;
mod error;
mod matrix;

pub use config::*;
pub use error::*;
pub use matrix::*;

/// Audio sample type. PCM arrives from transports as mono float32 in
/// [-1.0, 1.0]; feature files store float32 as well.
pub type Sample = f32;

/// Minimum sample rate accepted at session creation (Hz)
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Maximum sample rate accepted at session creation (Hz)
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Check a declared sample rate against the supported range
#[inline]
pub fn sample_rate_supported(sample_rate: u32) -> bool {
    (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate)
}
