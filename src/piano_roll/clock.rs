use std::time::Duration;

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 4.0;

/// Transport state. Always replaced as a whole value, never patched in
/// place, so readers on other threads see a consistent clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackClock {
    pub virtual_time: Duration,
    pub speed: f32,
    pub paused: bool,
    /// Visuals trail `virtual_time` by this much to line up with delayed audio
    pub delay: Duration,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self {
            virtual_time: Duration::ZERO,
            speed: 1.0,
            paused: false,
            delay: Duration::ZERO,
        }
    }
}

impl PlaybackClock {
    pub fn advanced(self, wall_delta: Duration) -> Self {
        if self.paused {
            return self;
        }
        Self {
            virtual_time: self.virtual_time + wall_delta.mul_f64(self.speed as f64),
            ..self
        }
    }

    /// Non-finite speeds are ignored, the rest is clamped.
    pub fn with_speed(self, speed: f32) -> Self {
        if !speed.is_finite() {
            return self;
        }
        Self {
            speed: speed.clamp(MIN_SPEED, MAX_SPEED),
            ..self
        }
    }

    /// The instant drawn on the "now" line.
    pub fn position(&self) -> Duration {
        self.virtual_time.saturating_sub(self.delay)
    }
}
