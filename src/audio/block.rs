use crossbeam::queue::ArrayQueue;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

/// A fixed-length run of mono samples in capture order.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Capture time of the first sample
    pub captured_at: Instant,
}

impl AudioBlock {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }
}

struct Shared {
    samples: ArrayQueue<f32>,
    /// Oldest samples discarded to make room for newer ones
    dropped: AtomicU64,
}

/// Creates the sample ring between a capture callback and a [`BlockReader`].
/// When the reader falls behind, the oldest samples are overwritten.
pub fn sample_ring(
    block_size: usize,
    ring_blocks: usize,
    sample_rate: u32,
) -> (SampleSink, BlockReader) {
    let shared = Arc::new(Shared {
        samples: ArrayQueue::new(block_size.max(1) * ring_blocks.max(2)),
        dropped: AtomicU64::new(0),
    });
    (
        SampleSink {
            shared: shared.clone(),
        },
        BlockReader::new(shared, block_size, sample_rate),
    )
}

/// Callback side of the sample ring. Never blocks and never allocates.
pub struct SampleSink {
    shared: Arc<Shared>,
}

impl SampleSink {
    /// Returns false when an older sample was discarded to make room.
    pub fn push(&self, sample: f32) -> bool {
        if self.shared.samples.force_push(sample).is_some() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Pushes every sample and returns how many old ones were discarded.
    pub fn push_slice(&self, samples: &[f32]) -> usize {
        samples.iter().filter(|&&s| !self.push(s)).count()
    }
}

/// Cuts the mono sample stream into [`AudioBlock`]s. Lives on the analysis
/// side so the capture callback never allocates.
pub struct BlockReader {
    shared: Arc<Shared>,
    block_size: usize,
    sample_rate: u32,
    started_at: Instant,
    samples_read: u64,
}

impl BlockReader {
    fn new(shared: Arc<Shared>, block_size: usize, sample_rate: u32) -> Self {
        Self {
            shared,
            block_size: block_size.max(1),
            sample_rate,
            started_at: Instant::now(),
            samples_read: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn available(&self) -> usize {
        self.shared.samples.len()
    }

    /// Samples overwritten before they could be read.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Returns the next complete block, or `None` until one is buffered.
    pub fn next_block(&mut self) -> Option<AudioBlock> {
        if self.shared.samples.len() < self.block_size {
            return None;
        }

        let mut samples = Vec::with_capacity(self.block_size);
        // the queue only grows between the length check and here
        while samples.len() < self.block_size {
            match self.shared.samples.pop() {
                Some(sample) => samples.push(sample),
                None => break,
            }
        }
        if samples.len() < self.block_size {
            return None;
        }

        // discarded samples still advance the capture position
        let position = self.samples_read + self.dropped();
        let offset = Duration::from_secs_f64(position as f64 / self.sample_rate.max(1) as f64);
        self.samples_read += samples.len() as u64;

        Some(AudioBlock {
            samples,
            sample_rate: self.sample_rate,
            captured_at: self.started_at + offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_whole_blocks_in_capture_order() {
        let (sink, mut reader) = sample_ring(4, 4, 8);
        assert_eq!(sink.push_slice(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]), 0);

        let first = reader.next_block().unwrap();
        assert_eq!(first.samples, vec![0.0, 1.0, 2.0, 3.0]);
        assert!(reader.next_block().is_none());
        assert_eq!(reader.available(), 2);

        sink.push_slice(&[6.0, 7.0]);
        let second = reader.next_block().unwrap();
        assert_eq!(second.samples, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(second.captured_at - first.captured_at, Duration::from_millis(500));
    }

    #[test]
    fn ring_holds_the_configured_number_of_blocks() {
        let (sink, reader) = sample_ring(4, 3, 44_100);
        assert_eq!(sink.push_slice(&[0.5; 20]), 8);
        assert_eq!(reader.available(), 12);
        assert_eq!(reader.dropped(), 8);
    }

    #[test]
    fn a_stalled_reader_keeps_the_newest_samples() {
        let (sink, mut reader) = sample_ring(2, 2, 8);
        let samples: Vec<f32> = (0..6).map(|i| i as f32).collect();
        assert_eq!(sink.push_slice(&samples), 2);

        let first = reader.next_block().unwrap();
        assert_eq!(first.samples, vec![2.0, 3.0]);
        let second = reader.next_block().unwrap();
        assert_eq!(second.samples, vec![4.0, 5.0]);
        assert!(reader.next_block().is_none());

        // the two lost samples still count toward capture time
        assert_eq!(first.captured_at - reader.started_at, Duration::from_millis(250));
    }

    #[test]
    fn block_duration() {
        let block = AudioBlock {
            samples: vec![0.0; 441],
            sample_rate: 44_100,
            captured_at: Instant::now(),
        };
        assert_eq!(block.duration(), Duration::from_millis(10));
    }
}
