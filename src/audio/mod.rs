mod block;
mod capture;
mod health;

pub use block::{AudioBlock, BlockReader, SampleSink, sample_ring};
pub use capture::AudioCapture;
pub use health::{HealthFailure, HealthMonitor, HealthReport, HealthStatus, StreamHealth};
