use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Failure bookkeeping shared between the stream callbacks and the engine.
/// Callbacks only touch atomics; the engine polls [`StreamHealth::status`].
pub struct StreamHealth {
    threshold: u32,
    consecutive: AtomicU32,
    skipped: AtomicU64,
    callbacks: AtomicU64,
    failed: AtomicBool,
    device_lost: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    /// Blocks (or callback periods) lost since the stream was opened
    pub skipped: u64,
    pub consecutive_failures: u32,
    /// Input data callbacks seen so far
    pub callbacks: u64,
    pub failed: bool,
    pub device_lost: bool,
}

impl StreamHealth {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: AtomicU32::new(0),
            skipped: AtomicU64::new(0),
            callbacks: AtomicU64::new(0),
            failed: AtomicBool::new(false),
            device_lost: AtomicBool::new(false),
        }
    }

    /// Called at the top of every input data callback.
    pub fn record_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// A callback ran and delivered its data. The streak is frozen once the
    /// stream has failed.
    pub fn record_ok(&self) {
        if self.failed.load(Ordering::Relaxed) {
            return;
        }
        if self.consecutive.load(Ordering::Relaxed) != 0 {
            self.consecutive.store(0, Ordering::Relaxed);
        }
    }

    /// A transient overrun/underrun: one gap, no escalation.
    pub fn record_gap(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A failed callback period. Returns true once the threshold is hit.
    pub fn record_failure(&self) -> bool {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        if consecutive >= self.threshold {
            self.failed.store(true, Ordering::Relaxed);
        }
        self.failed.load(Ordering::Relaxed)
    }

    /// The device is gone or the stream must be rebuilt. Fails at once.
    pub fn record_device_lost(&self) {
        self.device_lost.store(true, Ordering::Relaxed);
        self.failed.store(true, Ordering::Relaxed);
    }

    /// Routes a cpal stream error callback.
    pub fn record_stream_error(&self, err: &cpal::StreamError) {
        match err {
            cpal::StreamError::DeviceNotAvailable | cpal::StreamError::StreamInvalidated => {
                self.record_device_lost()
            }
            cpal::StreamError::BufferUnderrun => self.record_gap(),
            cpal::StreamError::BackendSpecific { .. } => {
                self.record_failure();
            }
        }
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            skipped: self.skipped.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive.load(Ordering::Relaxed),
            callbacks: self.callbacks.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            device_lost: self.device_lost.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthFailure {
    /// Too many consecutive failed callback periods
    Escalated { consecutive: u32 },
    DeviceLost,
    /// No input callback arrived for this long
    Stalled { idle: Duration },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Blocks skipped since the previous check
    pub newly_skipped: u64,
    pub failure: Option<HealthFailure>,
}

/// Engine-side view of a stream's health across polls. Holds no clocks of
/// its own so every decision can be replayed in tests.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    last: HealthStatus,
    idle: Duration,
    stall_limit: Duration,
}

impl HealthMonitor {
    pub fn new(initial: HealthStatus, stall_limit: Duration) -> Self {
        Self {
            last: initial,
            idle: Duration::ZERO,
            stall_limit,
        }
    }

    /// Compares `status` with the previous poll, `elapsed` after it.
    pub fn check(&mut self, status: HealthStatus, elapsed: Duration) -> HealthReport {
        let newly_skipped = status.skipped.saturating_sub(self.last.skipped);
        if status.callbacks == self.last.callbacks {
            self.idle += elapsed;
        } else {
            self.idle = Duration::ZERO;
        }
        self.last = status;

        let failure = if status.device_lost {
            Some(HealthFailure::DeviceLost)
        } else if status.failed {
            Some(HealthFailure::Escalated {
                consecutive: status.consecutive_failures,
            })
        } else if self.idle >= self.stall_limit {
            Some(HealthFailure::Stalled { idle: self.idle })
        } else {
            None
        };

        HealthReport {
            newly_skipped,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_after_threshold_consecutive_failures() {
        let health = StreamHealth::new(5);
        for _ in 0..4 {
            assert!(!health.record_failure());
        }
        assert!(health.record_failure());

        let status = health.status();
        assert!(status.failed);
        assert_eq!(status.consecutive_failures, 5);
        assert_eq!(status.skipped, 5);
    }

    #[test]
    fn success_resets_the_streak() {
        let health = StreamHealth::new(3);
        health.record_failure();
        health.record_failure();
        health.record_ok();
        health.record_failure();
        health.record_failure();

        let status = health.status();
        assert!(!status.failed);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.skipped, 4);
    }

    #[test]
    fn gaps_never_escalate() {
        let health = StreamHealth::new(1);
        for _ in 0..10 {
            health.record_gap();
        }
        assert!(!health.status().failed);
        assert_eq!(health.status().skipped, 10);
    }

    #[test]
    fn failure_is_sticky() {
        let health = StreamHealth::new(1);
        health.record_failure();
        health.record_ok();
        assert!(health.status().failed);
        assert_eq!(health.status().consecutive_failures, 1);
    }

    fn status(callbacks: u64) -> HealthStatus {
        HealthStatus {
            skipped: 0,
            consecutive_failures: 0,
            callbacks,
            failed: false,
            device_lost: false,
        }
    }

    #[test]
    fn device_not_available_fails_immediately() {
        let health = StreamHealth::new(5);
        health.record_stream_error(&cpal::StreamError::DeviceNotAvailable);

        let status = health.status();
        assert!(status.failed);
        assert!(status.device_lost);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[test]
    fn buffer_underruns_are_only_gaps() {
        let health = StreamHealth::new(1);
        health.record_stream_error(&cpal::StreamError::BufferUnderrun);
        assert!(!health.status().failed);
        assert_eq!(health.status().skipped, 1);
    }

    #[test]
    fn backend_errors_count_toward_the_threshold() {
        let health = StreamHealth::new(2);
        let err = cpal::StreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "xrun".to_string(),
            },
        };
        health.record_stream_error(&err);
        assert!(!health.status().failed);
        health.record_stream_error(&err);
        assert!(health.status().failed);
        assert!(!health.status().device_lost);
    }

    #[test]
    fn monitor_reports_new_skips_once() {
        let mut monitor = HealthMonitor::new(status(0), Duration::from_secs(1));
        let poll = Duration::from_millis(100);

        let mut current = status(4);
        current.skipped = 3;
        assert_eq!(
            monitor.check(current, poll),
            HealthReport {
                newly_skipped: 3,
                failure: None
            }
        );
        current.callbacks = 8;
        assert_eq!(monitor.check(current, poll).newly_skipped, 0);
    }

    #[test]
    fn monitor_flags_a_stream_whose_callbacks_stop() {
        let mut monitor = HealthMonitor::new(status(0), Duration::from_millis(500));
        let poll = Duration::from_millis(100);

        assert_eq!(monitor.check(status(10), poll).failure, None);
        for _ in 0..4 {
            assert_eq!(monitor.check(status(10), poll).failure, None);
        }
        assert_eq!(
            monitor.check(status(10), poll).failure,
            Some(HealthFailure::Stalled {
                idle: Duration::from_millis(500)
            })
        );
    }

    #[test]
    fn monitor_resets_idle_time_when_callbacks_resume() {
        let mut monitor = HealthMonitor::new(status(0), Duration::from_millis(300));
        let poll = Duration::from_millis(100);

        monitor.check(status(0), poll);
        monitor.check(status(0), poll);
        assert_eq!(monitor.check(status(1), poll).failure, None);
        monitor.check(status(1), poll);
        assert_eq!(monitor.check(status(1), poll).failure, None);
    }

    #[test]
    fn monitor_prefers_device_loss_over_escalation() {
        let mut monitor = HealthMonitor::new(status(0), Duration::from_secs(1));
        let health = StreamHealth::new(1);
        health.record_failure();
        assert_eq!(
            monitor.check(health.status(), Duration::ZERO).failure,
            Some(HealthFailure::Escalated { consecutive: 1 })
        );

        health.record_device_lost();
        assert_eq!(
            monitor.check(health.status(), Duration::ZERO).failure,
            Some(HealthFailure::DeviceLost)
        );
    }
}
