//! Dynamic time warping over MFCC matrices
//!
//! Frame-to-frame distance is squared Euclidean. Three entry points:
//! - `distance` - classic banded DTW, length-normalized
//! - `subsequence_distance` - free start/end inside a longer reference
//! - `path` - warping path for mean-along-path statistics
//!
//! `distance` and `subsequence_distance` keep only two cost rows (plus
//! matching path-length rows); `path` fills a banded matrix so it can
//! backtrack.

use cf_core::FeatureMatrix;

use crate::{SimError, SimResult};

/// Squared Euclidean distance between two frames
#[inline]
fn frame_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Banded DTW aligner
#[derive(Debug, Clone)]
pub struct DtwEngine {
    band_radius: usize,
}

impl Default for DtwEngine {
    fn default() -> Self {
        Self::new(50)
    }
}

impl DtwEngine {
    /// Create an engine with the given Sakoe-Chiba band radius (frames)
    pub fn new(band_radius: usize) -> Self {
        Self { band_radius }
    }

    /// Configured band radius
    pub fn band_radius(&self) -> usize {
        self.band_radius
    }

    fn check(a: &FeatureMatrix, b: &FeatureMatrix) -> SimResult<()> {
        if a.is_empty() || b.is_empty() {
            return Err(SimError::EmptyInput);
        }
        if a.num_coeffs() != b.num_coeffs() {
            return Err(SimError::DimensionMismatch {
                a: a.num_coeffs(),
                b: b.num_coeffs(),
            });
        }
        Ok(())
    }

    /// Effective band half-width for sequences of the given lengths
    #[inline]
    fn band(&self, ta: usize, tb: usize) -> usize {
        ta.abs_diff(tb) + self.band_radius
    }

    /// Length-normalized DTW distance between two sequences.
    ///
    /// Moves are (-1,-1), (-1,0), (0,-1) with equal cost; the first row
    /// and column extend from their single predecessor. The accumulated
    /// cost at the end cell is divided by the warping path length.
    pub fn distance(&self, a: &FeatureMatrix, b: &FeatureMatrix) -> SimResult<f32> {
        Self::check(a, b)?;
        let (ta, tb) = (a.num_frames(), b.num_frames());
        let band = self.band(ta, tb);

        let mut prev_cost = vec![f32::INFINITY; tb];
        let mut prev_len = vec![0u32; tb];
        let mut curr_cost = vec![f32::INFINITY; tb];
        let mut curr_len = vec![0u32; tb];

        // First row: extend right from (0, 0)
        let row0 = a.row(0);
        prev_cost[0] = frame_distance(row0, b.row(0));
        prev_len[0] = 1;
        for j in 1..tb.min(band + 1) {
            prev_cost[j] = prev_cost[j - 1] + frame_distance(row0, b.row(j));
            prev_len[j] = prev_len[j - 1] + 1;
        }

        for i in 1..ta {
            curr_cost.fill(f32::INFINITY);
            let lo = i.saturating_sub(band);
            let hi = (i + band).min(tb - 1);
            let row = a.row(i);

            for j in lo..=hi {
                let d = frame_distance(row, b.row(j));
                // Predecessors: diagonal, above, left
                let mut best = prev_cost.get(j.wrapping_sub(1)).copied().unwrap_or(f32::INFINITY);
                let mut best_len = prev_len.get(j.wrapping_sub(1)).copied().unwrap_or(0);
                if prev_cost[j] < best {
                    best = prev_cost[j];
                    best_len = prev_len[j];
                }
                if j > lo && curr_cost[j - 1] < best {
                    best = curr_cost[j - 1];
                    best_len = curr_len[j - 1];
                }
                if best.is_finite() {
                    curr_cost[j] = best + d;
                    curr_len[j] = best_len + 1;
                }
            }

            std::mem::swap(&mut prev_cost, &mut curr_cost);
            std::mem::swap(&mut prev_len, &mut curr_len);
        }

        let cost = prev_cost[tb - 1];
        let len = prev_len[tb - 1].max(1);
        if !cost.is_finite() {
            // Band too narrow to connect the corners; cannot happen with
            // band >= |ta - tb|, kept as a guard against misuse.
            return Err(SimError::EmptyInput);
        }
        Ok(cost / len as f32)
    }

    /// Best match of `query` anywhere inside `sequence`.
    ///
    /// Same recurrence as `distance`, but the first row carries no start
    /// penalty and the result is the minimum over the last row, divided
    /// by the query length.
    pub fn subsequence_distance(
        &self,
        query: &FeatureMatrix,
        sequence: &FeatureMatrix,
    ) -> SimResult<f32> {
        Self::check(query, sequence)?;
        let (tq, ts) = (query.num_frames(), sequence.num_frames());

        let mut prev = vec![0.0f32; ts];
        let mut curr = vec![0.0f32; ts];

        let row0 = query.row(0);
        for (j, p) in prev.iter_mut().enumerate() {
            *p = frame_distance(row0, sequence.row(j));
        }

        for i in 1..tq {
            let row = query.row(i);
            curr[0] = prev[0] + frame_distance(row, sequence.row(0));
            for j in 1..ts {
                let d = frame_distance(row, sequence.row(j));
                let best = prev[j - 1].min(prev[j]).min(curr[j - 1]);
                curr[j] = best + d;
            }
            std::mem::swap(&mut prev, &mut curr);
        }

        let min = prev.iter().copied().fold(f32::INFINITY, f32::min);
        Ok(min / tq as f32)
    }

    /// Warping path of the banded alignment, as (a-index, b-index) pairs
    /// from (0, 0) to (ta-1, tb-1).
    pub fn path(&self, a: &FeatureMatrix, b: &FeatureMatrix) -> SimResult<Vec<(usize, usize)>> {
        Self::check(a, b)?;
        let (ta, tb) = (a.num_frames(), b.num_frames());
        let band = self.band(ta, tb);

        let mut cost = vec![f32::INFINITY; ta * tb];
        cost[0] = frame_distance(a.row(0), b.row(0));
        for j in 1..tb.min(band + 1) {
            cost[j] = cost[j - 1] + frame_distance(a.row(0), b.row(j));
        }
        for i in 1..ta {
            let lo = i.saturating_sub(band);
            let hi = (i + band).min(tb - 1);
            let row = a.row(i);
            for j in lo..=hi {
                let d = frame_distance(row, b.row(j));
                let up = cost[(i - 1) * tb + j];
                let diag = if j > 0 {
                    cost[(i - 1) * tb + j - 1]
                } else {
                    f32::INFINITY
                };
                let left = if j > 0 {
                    cost[i * tb + j - 1]
                } else {
                    f32::INFINITY
                };
                let best = diag.min(up).min(left);
                if best.is_finite() {
                    cost[i * tb + j] = best + d;
                }
            }
        }

        // Backtrack, preferring the diagonal on ties
        let mut path = Vec::with_capacity(ta + tb);
        let (mut i, mut j) = (ta - 1, tb - 1);
        path.push((i, j));
        while i > 0 || j > 0 {
            if i == 0 {
                j -= 1;
            } else if j == 0 {
                i -= 1;
            } else {
                let diag = cost[(i - 1) * tb + j - 1];
                let up = cost[(i - 1) * tb + j];
                let left = cost[i * tb + j - 1];
                if diag <= up && diag <= left {
                    i -= 1;
                    j -= 1;
                } else if up <= left {
                    i -= 1;
                } else {
                    j -= 1;
                }
            }
            path.push((i, j));
        }
        path.reverse();
        Ok(path)
    }

    /// Mean frame distance along the optimal warping path
    pub fn mean_along_path(&self, a: &FeatureMatrix, b: &FeatureMatrix) -> SimResult<f32> {
        let path = self.path(a, b)?;
        let sum: f32 = path
            .iter()
            .map(|&(i, j)| frame_distance(a.row(i), b.row(j)))
            .sum();
        Ok(sum / path.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f32]]) -> FeatureMatrix {
        let mut m = FeatureMatrix::new(rows[0].len());
        for r in rows {
            m.push_row(r).unwrap();
        }
        m
    }

    /// Deterministic wavy matrix for larger tests. Different `step`
    /// values produce genuinely different trajectories, not time shifts.
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
    fn test_self_distance_is_zero() {
        let engine = DtwEngine::new(50);
        let m = wavy(60, 13, 0.2, 0.0);
        let d = engine.distance(&m, &m).unwrap();
        assert!(d.abs() < 1e-5, "self distance {d}");
    }

    #[test]
    fn test_empty_input_rejected() {
        let engine = DtwEngine::default();
        let empty = FeatureMatrix::new(13);
        let m = wavy(10, 13, 0.2, 0.0);
        assert!(matches!(
            engine.distance(&empty, &m),
            Err(SimError::EmptyInput)
        ));
        assert!(matches!(
            engine.subsequence_distance(&m, &empty),
            Err(SimError::EmptyInput)
        ));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let engine = DtwEngine::default();
        let a = wavy(10, 13, 0.2, 0.0);
        let b = wavy(10, 12, 0.2, 0.0);
        assert!(matches!(
            engine.distance(&a, &b),
            Err(SimError::DimensionMismatch { a: 13, b: 12 })
        ));
    }

    #[test]
    fn test_known_small_alignment() {
        let engine = DtwEngine::new(5);
        let a = matrix(&[&[0.0], &[1.0], &[2.0]]);
        let b = matrix(&[&[0.0], &[1.0], &[1.0], &[2.0]]);
        // Perfect alignment: the duplicated middle frame warps for free
        let d = engine.distance(&a, &b).unwrap();
        assert!(d.abs() < 1e-6, "distance {d}");
    }

    #[test]
    fn test_time_stretch_is_tolerated() {
        let engine = DtwEngine::new(50);
        let original = wavy(60, 13, 0.2, 0.0);
        // Same curve sampled at half speed
        let mut stretched = FeatureMatrix::new(13);
        for f in 0..120 {
            stretched.push_row(original.row(f / 2)).unwrap();
        }
        let warped = engine.distance(&original, &stretched).unwrap();
        let different = engine.distance(&original, &wavy(60, 13, 0.37, 2.5)).unwrap();
        assert!(
            warped < different * 0.25,
            "warped {warped} vs different {different}"
        );
    }

    #[test]
    fn test_subsequence_finds_embedded_query() {
        let engine = DtwEngine::new(50);
        let master = wavy(200, 13, 0.2, 0.0);

        // Query = frames 80..120 of the master
        let mut query = FeatureMatrix::new(13);
        for f in 80..120 {
            query.push_row(master.row(f)).unwrap();
        }

        let embedded = engine.subsequence_distance(&query, &master).unwrap();
        assert!(embedded.abs() < 1e-5, "embedded query distance {embedded}");

        let unrelated = engine
            .subsequence_distance(&wavy(40, 13, 0.37, 2.5), &master)
            .unwrap();
        assert!(unrelated > 0.1, "unrelated distance {unrelated}");
    }

    #[test]
    fn test_path_endpoints_and_monotonicity() {
        let engine = DtwEngine::new(50);
        let a = wavy(30, 13, 0.2, 0.0);
        let b = wavy(45, 13, 0.2, 0.3);
        let path = engine.path(&a, &b).unwrap();

        assert_eq!(*path.first().unwrap(), (0, 0));
        assert_eq!(*path.last().unwrap(), (29, 44));
        for w in path.windows(2) {
            let (i0, j0) = w[0];
            let (i1, j1) = w[1];
            assert!(i1 >= i0 && j1 >= j0);
            assert!(i1 - i0 <= 1 && j1 - j0 <= 1);
            assert!(i1 + j1 > i0 + j0);
        }
    }

    #[test]
    fn test_mean_along_path_matches_direct_average() {
        let engine = DtwEngine::new(10);
        let a = wavy(20, 5, 0.2, 0.0);
        let b = wavy(20, 5, 0.31, 0.8);
        let path = engine.path(&a, &b).unwrap();
        let direct: f32 = path
            .iter()
            .map(|&(i, j)| {
                a.row(i)
                    .iter()
                    .zip(b.row(j))
                    .map(|(&x, &y)| (x - y) * (x - y))
                    .sum::<f32>()
            })
            .sum::<f32>()
            / path.len() as f32;
        let mean = engine.mean_along_path(&a, &b).unwrap();
        approx::assert_abs_diff_eq!(mean, direct, epsilon = 1e-6);
    }
}
