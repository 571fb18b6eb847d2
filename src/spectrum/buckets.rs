use std::f32::consts::PI;

use crate::config::SpectrumConfig;

/// A contiguous run of FFT bins `[low_bin, high_bin)` shown as one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketRange {
    pub low_bin: usize,
    pub high_bin: usize,
    pub low_hz: f32,
    pub high_hz: f32,
}

impl BucketRange {
    pub fn center_hz(&self) -> f32 {
        (self.low_hz.max(f32::MIN_POSITIVE) * self.high_hz).sqrt()
    }

    pub fn contains(&self, hz: f32) -> bool {
        self.low_hz <= hz && hz < self.high_hz
    }
}

/// Logarithmically spaced buckets over the positive half of the spectrum.
/// Computed once per (sample rate, FFT size, bucket scheme).
#[derive(Debug, Clone, PartialEq)]
pub struct BucketLayout {
    ranges: Vec<BucketRange>,
    bin_hz: f32,
}

impl BucketLayout {
    pub fn new(config: &SpectrumConfig, fft_size: usize, sample_rate: u32) -> Self {
        let half = (fft_size / 2).max(1);
        let bin_hz = sample_rate as f32 / fft_size as f32;
        let count = config.bucket_count.max(1);

        let highest_bin_hz = (half - 1) as f32 * bin_hz;
        let min_hz = config.min_frequency.max(f32::MIN_POSITIVE);
        let max_hz = config.max_frequency.max(min_hz);
        let ratio = max_hz / min_hz;
        let edge = |i: usize| min_hz * ratio.powf(i as f32 / count as f32);

        // first bin whose frequency is >= hz
        let bin_at = |hz: f32| ((hz / bin_hz).ceil() as usize).min(half);

        let ranges = (0..count)
            .map(|i| {
                let low_bin = bin_at(edge(i)).min(half - 1);
                let mut high_bin = bin_at(edge(i + 1).min(highest_bin_hz));
                if high_bin <= low_bin {
                    high_bin = low_bin + 1;
                }
                if i == count - 1 {
                    high_bin = half;
                }
                BucketRange {
                    low_bin,
                    high_bin,
                    low_hz: low_bin as f32 * bin_hz,
                    high_hz: high_bin as f32 * bin_hz,
                }
            })
            .collect();

        Self { ranges, bin_hz }
    }

    pub fn ranges(&self) -> &[BucketRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn bin_hz(&self) -> f32 {
        self.bin_hz
    }

    /// Index of the first bucket whose range contains `hz`.
    pub fn bucket_for(&self, hz: f32) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(hz))
    }
}

pub fn hann_window(size: usize) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| 0.5 * (1.0 - ((2.0 * PI * i as f32) / (size as f32 - 1.0)).cos()))
        .collect()
}
