//! Similarity scoring
//!
//! Four components, each mapped to [0, 1] through `1 / (1 + raw / scale)`
//! with per-component scale constants tuned for MFCC magnitudes:
//! - offset: squared distance between the matrix means
//! - dtw: length-normalized full DTW distance
//! - mean: mean frame distance along the best DTW path
//! - subsequence: subsequence DTW of the session inside the master
//!
//! Streaming scores smooth the weighted overall with
//! `s = 0.7 * s_prev + 0.3 * new`; `finalize` computes everything once
//! more without smoothing and locks the canonical result.

use cf_core::{FeatureMatrix, SimilarityWeights};
use serde::{Deserialize, Serialize};

use crate::dtw::DtwEngine;
use crate::{SimError, SimResult};

/// Weight of the previous smoothed value
const SMOOTHING_PREV: f32 = 0.7;

/// Weight of the incoming value
const SMOOTHING_NEW: f32 = 0.3;

/// Reliability floor: at least this many observed frames
pub const RELIABILITY_FLOOR_FRAMES: usize = 25;

/// Reliability scales with the master length by this fraction
pub const RELIABILITY_MASTER_FRACTION: f32 = 0.25;

/// Frames required before scores count as reliable:
/// `max(25, ceil(0.25 * master_frames))`
pub fn min_frames_required(master_frames: usize) -> usize {
    let scaled = (RELIABILITY_MASTER_FRACTION * master_frames as f32).ceil() as usize;
    scaled.max(RELIABILITY_FLOOR_FRAMES)
}

/// Raw-distance scales for the `1 / (1 + raw / scale)` map.
///
/// Calibrated so identical audio lands near 1.0 and unrelated calls fall
/// well below the cross-call separation margin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScales {
    pub offset: f32,
    pub dtw: f32,
    pub mean: f32,
    pub subseq: f32,
}

impl Default for ComponentScales {
    fn default() -> Self {
        Self {
            offset: 4.0,
            dtw: 12.0,
            mean: 12.0,
            subseq: 10.0,
        }
    }
}

/// Similarity components, all in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityComponents {
    /// Coarse timbral offset
    pub offset: f32,
    /// Full DTW alignment quality
    pub dtw: f32,
    /// Mean per-frame agreement along the warping path
    pub mean: f32,
    /// Best-subsequence match quality
    pub subsequence: f32,
    /// Weighted combination (smoothed on the streaming path)
    pub overall: f32,
}

/// Streaming similarity scorer with finalization semantics
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    dtw: DtwEngine,
    weights: SimilarityWeights,
    scales: ComponentScales,
    smoothed: Option<f32>,
    finalized: Option<SimilarityComponents>,
}

impl SimilarityScorer {
    /// Create a scorer with the given DTW band radius and weights
    pub fn new(band_radius: usize, weights: SimilarityWeights) -> Self {
        Self {
            dtw: DtwEngine::new(band_radius),
            weights,
            scales: ComponentScales::default(),
            smoothed: None,
            finalized: None,
        }
    }

    /// Override the raw-distance scales
    pub fn with_scales(mut self, scales: ComponentScales) -> Self {
        self.scales = scales;
        self
    }

    /// Canonical result, present once `finalize` has run
    pub fn finalized(&self) -> Option<&SimilarityComponents> {
        self.finalized.as_ref()
    }

    /// Streaming score over the current session window.
    ///
    /// After finalization this returns the locked result unchanged.
    pub fn score(
        &mut self,
        session: &FeatureMatrix,
        master: &FeatureMatrix,
    ) -> SimResult<SimilarityComponents> {
        if let Some(locked) = self.finalized {
            return Ok(locked);
        }

        let mut components = self.compute(session, master, false)?;
        let smoothed = match self.smoothed {
            Some(prev) => SMOOTHING_PREV * prev + SMOOTHING_NEW * components.overall,
            None => components.overall,
        };
        self.smoothed = Some(smoothed);
        components.overall = smoothed;
        Ok(components)
    }

    /// Full unsmoothed computation; the result becomes canonical.
    ///
    /// A second call fails with `AlreadyFinalized`.
    pub fn finalize(
        &mut self,
        session: &FeatureMatrix,
        master: &FeatureMatrix,
    ) -> SimResult<SimilarityComponents> {
        if self.finalized.is_some() {
            return Err(SimError::AlreadyFinalized);
        }
        let components = self.compute(session, master, true)?;
        log::debug!(
            "similarity finalized: overall {:.3} ({} session frames vs {} master frames)",
            components.overall,
            session.num_frames(),
            master.num_frames()
        );
        self.finalized = Some(components);
        Ok(components)
    }

    /// Clear smoothing state and any finalized result
    pub fn reset(&mut self) {
        self.smoothed = None;
        self.finalized = None;
    }

    fn compute(
        &self,
        session: &FeatureMatrix,
        master: &FeatureMatrix,
        parallel: bool,
    ) -> SimResult<SimilarityComponents> {
        let offset_raw = mean_vector_distance(session, master);

        // The two DTW passes are independent; finalization runs them on
        // both halves of a rayon join, the streaming path stays serial.
        let (dtw_raw, subseq_raw) = if parallel {
            let (d, s) = rayon::join(
                || self.dtw.distance(session, master),
                || self.dtw.subsequence_distance(session, master),
            );
            (d?, s?)
        } else {
            (
                self.dtw.distance(session, master)?,
                self.dtw.subsequence_distance(session, master)?,
            )
        };
        let mean_raw = self.dtw.mean_along_path(session, master)?;

        let offset = normalize(offset_raw, self.scales.offset);
        let dtw = normalize(dtw_raw, self.scales.dtw);
        let mean = normalize(mean_raw, self.scales.mean);
        let subsequence = normalize(subseq_raw, self.scales.subseq);

        let w = &self.weights;
        let overall = ((w.offset * offset + w.dtw * dtw + w.mean * mean + w.subseq * subsequence)
            / w.total())
        .clamp(0.0, 1.0);

        Ok(SimilarityComponents {
            offset,
            dtw,
            mean,
            subsequence,
            overall,
        })
    }
}

/// Monotonic map from a raw distance to a [0, 1] score
#[inline]
fn normalize(raw: f32, scale: f32) -> f32 {
    (1.0 / (1.0 + raw.max(0.0) / scale)).clamp(0.0, 1.0)
}

/// Squared Euclidean distance between the per-coefficient means
fn mean_vector_distance(a: &FeatureMatrix, b: &FeatureMatrix) -> f32 {
    a.mean_vector()
        .iter()
        .zip(b.mean_vector().iter())
        .map(|(&x, &y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wavy(frames: usize, coeffs: usize, step: f32, phase: f32) -> FeatureMatrix {
        let mut m = FeatureMatrix::new(coeffs);
        let mut row = vec![0.0f32; coeffs];
        for f in 0..frames {
            for (c, v) in row.iter_mut().enumerate() {
                *v = ((f as f32 * step + phase) + c as f32 * (1.0 + step)).sin() * 2.0;
            }
            m.push_row(&row).unwrap();
        }
        m
    }

    #[test]
    fn test_min_frames_rule() {
        assert_eq!(min_frames_required(10), 25);
        assert_eq!(min_frames_required(100), 25);
        assert_eq!(min_frames_required(200), 50);
        assert_eq!(min_frames_required(401), 101);
    }

    #[test]
    fn test_self_similarity_is_high() {
        let mut scorer = SimilarityScorer::new(50, SimilarityWeights::default());
        let m = wavy(120, 13, 0.2, 0.0);
        let c = scorer.score(&m, &m).unwrap();
        assert!(c.overall > 0.95, "self overall {}", c.overall);
        assert!(c.dtw > 0.99);
        assert!(c.subsequence > 0.99);
    }

    #[test]
    fn test_different_material_scores_lower() {
        let scorer = SimilarityScorer::new(50, SimilarityWeights::default());
        let master = wavy(120, 13, 0.2, 0.0);
        let other = wavy(120, 13, 0.41, 2.0);

        let self_score = scorer.compute(&master, &master, false).unwrap().overall;
        let cross_score = scorer.compute(&other, &master, false).unwrap().overall;
        assert!(
            self_score - cross_score >= 0.15,
            "separation {} vs {}",
            self_score,
            cross_score
        );
    }

    #[test]
    fn test_components_are_bounded() {
        let mut scorer = SimilarityScorer::new(50, SimilarityWeights::default());
        let a = wavy(60, 13, 0.5, 1.0);
        let b = wavy(90, 13, 0.13, 0.2);
        let c = scorer.score(&a, &b).unwrap();
        for v in [c.offset, c.dtw, c.mean, c.subsequence, c.overall] {
            assert!((0.0..=1.0).contains(&v), "component {v} out of range");
        }
    }

    #[test]
    fn test_streaming_smoothing_converges() {
        let mut scorer = SimilarityScorer::new(50, SimilarityWeights::default());
        let master = wavy(120, 13, 0.2, 0.0);
        let other = wavy(120, 13, 0.41, 2.0);

        // Prime the smoother on dissimilar audio, then feed identical audio
        scorer.score(&other, &master).unwrap();
        let mut last = 0.0;
        for _ in 0..24 {
            last = scorer.score(&master, &master).unwrap().overall;
        }
        let unsmoothed = scorer.compute(&master, &master, false).unwrap().overall;
        assert!((last - unsmoothed).abs() < 0.01, "{last} vs {unsmoothed}");
    }

    #[test]
    fn test_finalize_locks_and_rejects_repeat() {
        let mut scorer = SimilarityScorer::new(50, SimilarityWeights::default());
        let master = wavy(120, 13, 0.2, 0.0);

        let final_components = scorer.finalize(&master, &master).unwrap();
        assert!(matches!(
            scorer.finalize(&master, &master),
            Err(SimError::AlreadyFinalized)
        ));

        // Streaming queries after finalize return the locked value
        let other = wavy(120, 13, 0.41, 2.0);
        let after = scorer.score(&other, &master).unwrap();
        assert_eq!(after, final_components);
    }

    #[test]
    fn test_reset_unlocks_finalization() {
        let mut scorer = SimilarityScorer::new(50, SimilarityWeights::default());
        let m = wavy(60, 13, 0.2, 0.0);
        scorer.finalize(&m, &m).unwrap();
        scorer.reset();
        assert!(scorer.finalized().is_none());
        assert!(scorer.finalize(&m, &m).is_ok());
    }

    #[test]
    fn test_partial_performance_keeps_subsequence_high() {
        // A practice session that covers only the middle of the master:
        // the subsequence component stays near perfect while full DTW
        // pays for the missing prefix/suffix.
        let scorer = SimilarityScorer::new(50, SimilarityWeights::default());
        let master = wavy(200, 13, 0.2, 0.0);
        let mut partial = FeatureMatrix::new(13);
        for f in 60..140 {
            partial.push_row(master.row(f)).unwrap();
        }

        let c = scorer.compute(&partial, &master, false).unwrap();
        assert!(c.subsequence > 0.95, "subsequence {}", c.subsequence);
        assert!(
            c.subsequence > c.dtw,
            "subsequence {} should beat full dtw {}",
            c.subsequence,
            c.dtw
        );
    }

    #[test]
    fn test_mismatched_dims_propagate() {
        let mut scorer = SimilarityScorer::new(50, SimilarityWeights::default());
        let a = wavy(30, 13, 0.2, 0.0);
        let b = wavy(30, 12, 0.2, 0.0);
        assert!(matches!(
            scorer.score(&a, &b),
            Err(SimError::DimensionMismatch { .. })
        ));
    }
}
