//! Waveform overview buckets
//!
//! Min/max/RMS decimation of the ingested audio, kept per session so the
//! host can draw a waveform without holding raw PCM. One fixed bucket
//! resolution is maintained; `overview` re-decimates to whatever bucket
//! count the display asks for.

use serde::{Deserialize, Serialize};

/// Samples folded into one stored bucket
const SAMPLES_PER_BUCKET: usize = 512;

/// One display bucket
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WaveformBucket {
    /// Minimum sample value in the bucket
    pub min: f32,
    /// Maximum sample value in the bucket
    pub max: f32,
    /// RMS energy in the bucket
    pub rms: f32,
}

/// Decimated waveform data for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformOverview {
    /// Buckets in time order
    pub buckets: Vec<WaveformBucket>,
    /// Source samples represented by each bucket
    pub samples_per_bucket: usize,
    /// Sample rate of the source audio (Hz)
    pub sample_rate: u32,
}

/// Running bucket accumulator fed on every chunk
#[derive(Debug, Clone)]
pub(crate) struct WaveformBuilder {
    sample_rate: u32,
    max_buckets: usize,
    buckets: Vec<WaveformBucket>,
    cur_min: f32,
    cur_max: f32,
    cur_sum_sq: f64,
    cur_count: usize,
}

impl WaveformBuilder {
    /// `max_secs` bounds retention; the oldest buckets fall off
    pub fn new(sample_rate: u32, max_secs: f32) -> Self {
        let max_buckets = ((max_secs * sample_rate as f32) as usize / SAMPLES_PER_BUCKET).max(16);
        Self {
            sample_rate,
            max_buckets,
            buckets: Vec::new(),
            cur_min: f32::MAX,
            cur_max: f32::MIN,
            cur_sum_sq: 0.0,
            cur_count: 0,
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        for &x in samples {
            self.cur_min = self.cur_min.min(x);
            self.cur_max = self.cur_max.max(x);
            self.cur_sum_sq += (x as f64) * (x as f64);
            self.cur_count += 1;

            if self.cur_count == SAMPLES_PER_BUCKET {
                self.flush_bucket();
            }
        }
    }

    /// Re-decimate the stored buckets down to at most `max_buckets`
    pub fn overview(&self, max_buckets: usize) -> WaveformOverview {
        let max_buckets = max_buckets.max(1);
        let group = self.buckets.len().div_ceil(max_buckets).max(1);

        let buckets: Vec<WaveformBucket> = self
            .buckets
            .chunks(group)
            .map(|chunk| {
                let mut min = f32::MAX;
                let mut max = f32::MIN;
                let mut sum_sq = 0.0f64;
                for b in chunk {
                    min = min.min(b.min);
                    max = max.max(b.max);
                    sum_sq += (b.rms as f64) * (b.rms as f64);
                }
                WaveformBucket {
                    min,
                    max,
                    rms: (sum_sq / chunk.len() as f64).sqrt() as f32,
                }
            })
            .collect();

        WaveformOverview {
            buckets,
            samples_per_bucket: SAMPLES_PER_BUCKET * group,
            sample_rate: self.sample_rate,
        }
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
        self.cur_min = f32::MAX;
        self.cur_max = f32::MIN;
        self.cur_sum_sq = 0.0;
        self.cur_count = 0;
    }

    fn flush_bucket(&mut self) {
        let bucket = WaveformBucket {
            min: self.cur_min,
            max: self.cur_max,
            rms: (self.cur_sum_sq / self.cur_count as f64).sqrt() as f32,
        };
        if self.buckets.len() == self.max_buckets {
            self.buckets.remove(0);
        }
        self.buckets.push(bucket);

        self.cur_min = f32::MAX;
        self.cur_max = f32::MIN;
        self.cur_sum_sq = 0.0;
        self.cur_count = 0;
    }
}
