mod buckets;
mod worker;

pub use buckets::{BucketLayout, BucketRange, hann_window};
pub use worker::AnalyzerWorker;

use arc_swap::ArcSwap;
use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::AudioBlock;
use crate::config::SpectrumConfig;

const EPSILON: f32 = 1e-12;
const COMPENSATION_START_HZ: f32 = 2000.0;
const MAX_COMPENSATION_DB: f32 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumBucket {
    pub low_hz: f32,
    pub high_hz: f32,
    /// Band level in dBFS, high-frequency compensated
    pub magnitude_db: f32,
    /// Smoothed display level, 0.0 -> 1.0
    pub level: f32,
    /// Peak-hold level, 0.0 -> 1.0
    pub peak: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumSnapshot {
    pub buckets: Vec<SpectrumBucket>,
    /// Capture time of the newest sample in the window; `None` before the
    /// first window completes
    pub timestamp: Option<Instant>,
    /// Number of analysis cycles that produced this value
    pub sequence: u64,
}

impl SpectrumSnapshot {
    fn empty(layout: &BucketLayout, floor_db: f32, sequence: u64) -> Self {
        let buckets = layout
            .ranges()
            .iter()
            .map(|r| SpectrumBucket {
                low_hz: r.low_hz,
                high_hz: r.high_hz,
                magnitude_db: floor_db,
                level: 0.0,
                peak: 0.0,
            })
            .collect();
        Self {
            buckets,
            timestamp: None,
            sequence,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none()
    }

    /// Index of the loudest bucket by `magnitude_db`.
    pub fn peak_bucket(&self) -> Option<usize> {
        self.buckets
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.magnitude_db.total_cmp(&b.1.magnitude_db))
            .map(|(i, _)| i)
    }
}

/// Cloneable read side of the latest spectrum. Never blocks.
#[derive(Clone)]
pub struct SpectrumReader {
    latest: Arc<ArcSwap<SpectrumSnapshot>>,
}

impl SpectrumReader {
    pub fn latest(&self) -> Arc<SpectrumSnapshot> {
        self.latest.load_full()
    }
}

pub struct SpectrumAnalyzer {
    config: SpectrumConfig,
    sample_rate: u32,
    fft_size: usize,
    hop_size: usize,
    layout: BucketLayout,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    window_correction: f32,

    history: Vec<f32>,
    write_pos: usize,
    filled: usize,
    since_last: usize,

    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    levels: Vec<f32>,
    peaks: Vec<f32>,
    hold: Vec<u32>,

    sequence: u64,
    latest: Arc<ArcSwap<SpectrumSnapshot>>,
}

impl SpectrumAnalyzer {
    pub fn new(config: &SpectrumConfig, sample_rate: u32) -> Self {
        let fft_size = config.fft_size.max(2).next_power_of_two();
        let hop_size = config.hop_size.clamp(1, fft_size);
        let layout = BucketLayout::new(config, fft_size, sample_rate);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        let window = hann_window(fft_size);
        let window_correction = window.iter().sum::<f32>() / fft_size as f32;

        let bucket_count = layout.len();
        let latest = Arc::new(ArcSwap::from_pointee(SpectrumSnapshot::empty(
            &layout,
            config.floor_db,
            0,
        )));

        Self {
            config: config.clone(),
            sample_rate,
            fft_size,
            hop_size,
            layout,
            fft,
            window,
            window_correction,
            history: vec![0.0; fft_size],
            write_pos: 0,
            filled: 0,
            since_last: 0,
            spectrum: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            magnitudes: vec![0.0; fft_size / 2],
            levels: vec![0.0; bucket_count],
            peaks: vec![0.0; bucket_count],
            hold: vec![0; bucket_count],
            sequence: 0,
            latest,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    pub fn reader(&self) -> SpectrumReader {
        SpectrumReader {
            latest: self.latest.clone(),
        }
    }

    pub fn latest_snapshot(&self) -> Arc<SpectrumSnapshot> {
        self.latest.load_full()
    }

    /// Appends a block to the sliding window. Returns how many snapshots
    /// were published while consuming it.
    pub fn feed(&mut self, block: &AudioBlock) -> usize {
        let mut produced = 0;
        let rate = block.sample_rate.max(1) as f64;

        for (i, &sample) in block.samples.iter().enumerate() {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
            self.filled = (self.filled + 1).min(self.fft_size);
            self.since_last += 1;

            if self.filled == self.fft_size && self.since_last >= self.hop_size {
                let at = block.captured_at + Duration::from_secs_f64(i as f64 / rate);
                self.analyze(at);
                self.since_last = 0;
                produced += 1;
            }
        }
        produced
    }

    /// Forgets buffered audio and display history, e.g. after a reopen.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_pos = 0;
        self.filled = 0;
        self.since_last = 0;
        self.levels.fill(0.0);
        self.peaks.fill(0.0);
        self.hold.fill(0);
        self.latest.store(Arc::new(SpectrumSnapshot::empty(
            &self.layout,
            self.config.floor_db,
            self.sequence,
        )));
    }

    fn analyze(&mut self, timestamp: Instant) {
        // write_pos is the oldest sample
        for i in 0..self.fft_size {
            let sample = self.history[(self.write_pos + i) % self.fft_size];
            self.spectrum[i] = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let scale = 1.0 / (self.fft_size as f32 * self.window_correction);
        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.spectrum) {
            *magnitude = bin.norm() * scale;
        }

        let range_db = (self.config.ceiling_db - self.config.floor_db).max(f32::EPSILON);
        let mut buckets = Vec::with_capacity(self.layout.len());

        for (i, range) in self.layout.ranges().iter().enumerate() {
            let band = &self.magnitudes[range.low_bin..range.high_bin.min(self.magnitudes.len())];
            let rms = if band.is_empty() {
                0.0
            } else {
                (band.iter().map(|m| m * m).sum::<f32>() / band.len() as f32).sqrt()
            };

            let mut band_db = 20.0 * (rms + EPSILON).log10();
            let center = range.center_hz();
            if center > COMPENSATION_START_HZ {
                band_db +=
                    ((center / COMPENSATION_START_HZ).log10() * 3.0).min(MAX_COMPENSATION_DB);
            }

            let normalized = ((band_db - self.config.floor_db) / range_db).clamp(0.0, 1.0);
            let smoothing = self.config.smoothing.clamp(0.0, 1.0);
            self.levels[i] = smoothing * normalized + (1.0 - smoothing) * self.levels[i];

            if self.levels[i] > self.peaks[i] {
                self.peaks[i] = self.levels[i];
                self.hold[i] = self.config.peak_hold_cycles;
            } else if self.hold[i] > 0 {
                self.hold[i] -= 1;
            } else {
                self.peaks[i] *= self.config.peak_decay;
            }

            buckets.push(SpectrumBucket {
                low_hz: range.low_hz,
                high_hz: range.high_hz,
                magnitude_db: band_db,
                level: self.levels[i],
                peak: self.peaks[i],
            });
        }

        self.sequence += 1;
        self.latest.store(Arc::new(SpectrumSnapshot {
            buckets,
            timestamp: Some(timestamp),
            sequence: self.sequence,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const RATE: u32 = 44_100;
    const BLOCK: usize = 1024;

    fn sine_blocks(freq: f32, amplitude: f32, count: usize) -> Vec<AudioBlock> {
        let start = Instant::now();
        (0..count)
            .map(|b| AudioBlock {
                samples: (0..BLOCK)
                    .map(|i| {
                        let n = (b * BLOCK + i) as f32;
                        amplitude * (2.0 * PI * freq * n / RATE as f32).sin()
                    })
                    .collect(),
                sample_rate: RATE,
                captured_at: start + Duration::from_secs_f64((b * BLOCK) as f64 / RATE as f64),
            })
            .collect()
    }

    #[test]
    fn empty_snapshot_before_first_window() {
        let analyzer = SpectrumAnalyzer::new(&SpectrumConfig::default(), RATE);
        let snapshot = analyzer.latest_snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.sequence, 0);
        assert_eq!(snapshot.buckets.len(), 64);
        assert!(snapshot.buckets.iter().all(|b| b.level == 0.0));
    }

    #[test]
    fn four_blocks_fill_one_window() {
        let mut analyzer = SpectrumAnalyzer::new(&SpectrumConfig::default(), RATE);
        let blocks = sine_blocks(440.0, 0.5, 5);

        let produced: Vec<usize> = blocks[..4].iter().map(|b| analyzer.feed(b)).collect();
        assert_eq!(produced, vec![0, 0, 0, 1]);
        assert_eq!(analyzer.latest_snapshot().sequence, 1);

        // the window slides by one hop per block from then on
        assert_eq!(analyzer.feed(&blocks[4]), 1);
        assert_eq!(analyzer.latest_snapshot().sequence, 2);
    }

    #[test]
    fn sinusoid_peaks_in_its_bucket() {
        for freq in [220.0, 1000.0, 5000.0] {
            let mut analyzer = SpectrumAnalyzer::new(&SpectrumConfig::default(), RATE);
            for block in sine_blocks(freq, 0.5, 4) {
                analyzer.feed(&block);
            }
            let snapshot = analyzer.latest_snapshot();
            let expected = analyzer.layout().bucket_for(freq).unwrap();
            let peak = snapshot.peak_bucket().unwrap();
            assert!(
                peak.abs_diff(expected) <= 1,
                "{freq} Hz peaked in bucket {peak}, expected {expected}"
            );
        }
    }

    #[test]
    fn bucket_count_is_fixed_across_cycles() {
        let mut analyzer = SpectrumAnalyzer::new(&SpectrumConfig::default(), RATE);
        let before = analyzer.latest_snapshot().buckets.len();
        for block in sine_blocks(440.0, 0.5, 8) {
            analyzer.feed(&block);
            assert_eq!(analyzer.latest_snapshot().buckets.len(), before);
        }
    }

    #[test]
    fn silence_stays_at_the_floor() {
        let mut analyzer = SpectrumAnalyzer::new(&SpectrumConfig::default(), RATE);
        for block in sine_blocks(440.0, 0.0, 4) {
            analyzer.feed(&block);
        }
        let snapshot = analyzer.latest_snapshot();
        assert!(!snapshot.is_empty());
        assert!(snapshot.buckets.iter().all(|b| b.level == 0.0 && b.peak == 0.0));
    }

    #[test]
    fn reader_sees_published_snapshots_and_reset() {
        let mut analyzer = SpectrumAnalyzer::new(&SpectrumConfig::default(), RATE);
        let reader = analyzer.reader();
        for block in sine_blocks(1000.0, 0.5, 4) {
            analyzer.feed(&block);
        }
        assert_eq!(reader.latest().sequence, 1);
        assert!(reader.latest().buckets.iter().any(|b| b.level > 0.0));

        analyzer.reset();
        assert!(reader.latest().is_empty());
        assert_eq!(analyzer.feed(&sine_blocks(1000.0, 0.5, 1)[0]), 0);
    }

    #[test]
    fn non_power_of_two_sizes_round_up() {
        let config = SpectrumConfig {
            fft_size: 3000,
            ..SpectrumConfig::default()
        };
        let analyzer = SpectrumAnalyzer::new(&config, RATE);
        assert_eq!(analyzer.fft_size(), 4096);
    }
}
