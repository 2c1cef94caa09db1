//! Master call feature references
//!
//! A `MasterCall` is immutable after construction and shared between
//! sessions through `Arc`. Feature matrices come from the feature store,
//! from direct injection (test path), or from in-process analysis of raw
//! audio.

use cf_core::FeatureMatrix;
use cf_dsp::{MfccConfig, MfccProcessor};
use cf_file::FileError;

use crate::{EngineError, EngineResult};

/// An immutable reference recording: id plus its MFCC feature matrix
#[derive(Debug, Clone)]
pub struct MasterCall {
    id: String,
    sample_rate: u32,
    frame_size: usize,
    hop_size: usize,
    features: FeatureMatrix,
}

impl MasterCall {
    /// Wrap a preanalyzed feature matrix.
    ///
    /// Fails if the matrix has no frames; every frame is guaranteed to
    /// have the same coefficient count by construction of the matrix.
    pub fn new(
        id: impl Into<String>,
        sample_rate: u32,
        frame_size: usize,
        hop_size: usize,
        features: FeatureMatrix,
    ) -> EngineResult<Self> {
        if features.is_empty() {
            return Err(EngineError::File(FileError::InvalidMatrix(
                "master feature matrix has no frames".into(),
            )));
        }
        Ok(Self {
            id: id.into(),
            sample_rate,
            frame_size,
            hop_size,
            features,
        })
    }

    /// Analyze raw mono audio into a master in-process.
    ///
    /// Hosts normally load `.mfc` files produced by the offline pipeline;
    /// this path exists for tests and for building masters from live
    /// recordings.
    pub fn from_audio(
        id: impl Into<String>,
        samples: &[f32],
        config: &MfccConfig,
    ) -> EngineResult<Self> {
        let mut processor = MfccProcessor::new(config.clone())?;
        let features = processor.analyze(samples)?;
        Self::new(
            id,
            config.sample_rate,
            config.frame_size,
            config.hop_size,
            features,
        )
    }

    /// Call id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sample rate the master was analyzed at (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Analysis frame size used when the master was built
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Analysis hop size used when the master was built
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Number of feature frames
    pub fn num_frames(&self) -> usize {
        self.features.num_frames()
    }

    /// The feature matrix
    pub fn features(&self) -> &FeatureMatrix {
        &self.features
    }
}
