//! Row-major feature matrices
//!
//! MFCC feature sequences are stored as flat `f32` buffers, one row per
//! analysis frame. Flat storage keeps the per-frame append path free of
//! nested allocations and maps directly onto the `.mfc` file payload.

use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

/// A sequence of fixed-width feature vectors (frames x coefficients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    num_coeffs: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    /// Create an empty matrix with the given row width
    pub fn new(num_coeffs: usize) -> Self {
        Self {
            num_coeffs,
            data: Vec::new(),
        }
    }

    /// Create an empty matrix with capacity reserved for `frames` rows
    pub fn with_capacity(num_coeffs: usize, frames: usize) -> Self {
        Self {
            num_coeffs,
            data: Vec::with_capacity(num_coeffs * frames),
        }
    }

    /// Build a matrix from a flat row-major buffer.
    ///
    /// Fails if the buffer length is not a multiple of `num_coeffs`.
    pub fn from_raw(num_coeffs: usize, data: Vec<f32>) -> CoreResult<Self> {
        if num_coeffs == 0 || data.len() % num_coeffs != 0 {
            return Err(CoreError::RaggedData {
                len: data.len(),
                num_coeffs,
            });
        }
        Ok(Self { num_coeffs, data })
    }

    /// Row width (coefficients per frame)
    #[inline]
    pub fn num_coeffs(&self) -> usize {
        self.num_coeffs
    }

    /// Number of frames
    #[inline]
    pub fn num_frames(&self) -> usize {
        if self.num_coeffs == 0 {
            0
        } else {
            self.data.len() / self.num_coeffs
        }
    }

    /// True if no frames have been appended
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow a single frame
    #[inline]
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.num_coeffs;
        &self.data[start..start + self.num_coeffs]
    }

    /// Iterate over frames in order
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f32]> {
        self.data.chunks_exact(self.num_coeffs)
    }

    /// Append one frame.
    ///
    /// Fails if the row width does not match the matrix.
    pub fn push_row(&mut self, row: &[f32]) -> CoreResult<()> {
        if row.len() != self.num_coeffs {
            return Err(CoreError::DimensionMismatch {
                expected: self.num_coeffs,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Drop the `frames` oldest rows.
    ///
    /// Used to keep per-session feature windows bounded; scoring operates
    /// on whatever rows remain.
    pub fn trim_front(&mut self, frames: usize) {
        let remove = frames.min(self.num_frames()) * self.num_coeffs;
        self.data.drain(..remove);
    }

    /// Remove all rows, keeping the allocation
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Flat row-major view of the whole matrix
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Per-coefficient mean across all frames.
    ///
    /// Returns a zero vector for an empty matrix.
    pub fn mean_vector(&self) -> Vec<f32> {
        let mut mean = vec![0.0f32; self.num_coeffs];
        let frames = self.num_frames();
        if frames == 0 {
            return mean;
        }
        for row in self.rows() {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        let scale = 1.0 / frames as f32;
        for m in &mut mean {
            *m *= scale;
        }
        mean
    }
}
