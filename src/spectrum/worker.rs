use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::SpectrumAnalyzer;
use crate::audio::BlockReader;

/// Drains a [`BlockReader`] into a [`SpectrumAnalyzer`] on its own thread so
/// the capture callback never waits on an FFT.
pub struct AnalyzerWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<SpectrumAnalyzer>,
}

impl AnalyzerWorker {
    pub fn spawn(mut reader: BlockReader, mut analyzer: SpectrumAnalyzer) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let block_period = Duration::from_secs_f64(
            reader.block_size() as f64 / reader.sample_rate().max(1) as f64,
        );
        let idle = (block_period / 4).max(Duration::from_millis(1));

        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let mut fed = false;
                while let Some(block) = reader.next_block() {
                    analyzer.feed(&block);
                    fed = true;
                }
                if !fed {
                    thread::sleep(idle);
                }
            }
            analyzer
        });

        Self { stop, handle }
    }

    /// Stops the thread and hands the analyzer back for reuse.
    pub fn stop(self) -> Option<SpectrumAnalyzer> {
        self.stop.store(true, Ordering::Relaxed);
        match self.handle.join() {
            Ok(analyzer) => Some(analyzer),
            Err(_) => {
                tracing::error!("spectrum worker panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sample_ring;
    use crate::config::SpectrumConfig;
    use std::time::Instant;

    #[test]
    fn publishes_from_pushed_samples_and_stops() {
        let (sink, reader) = sample_ring(1024, 8, 44_100);
        let analyzer = SpectrumAnalyzer::new(&SpectrumConfig::default(), 44_100);
        let spectrum = analyzer.reader();
        let worker = AnalyzerWorker::spawn(reader, analyzer);

        let samples: Vec<f32> = (0..4096)
            .map(|n| 0.5 * (n as f32 * 0.1).sin())
            .collect();
        assert_eq!(sink.push_slice(&samples), 0);

        let deadline = Instant::now() + Duration::from_secs(2);
        while spectrum.latest().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(spectrum.latest().sequence, 1);

        let stopping = Instant::now();
        let analyzer = worker.stop().unwrap();
        assert!(stopping.elapsed() < Duration::from_millis(100));
        assert_eq!(analyzer.latest_snapshot().sequence, 1);
    }
}
