use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "pianoscope.ron";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub spectrum: SpectrumConfig,
    pub midi: MidiConfig,
    pub roll: RollConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per block handed to the analyzer
    pub block_size: usize,
    /// Consecutive stream failures tolerated before the source is closed
    pub failure_threshold: u32,
    /// Capacity of the capture rings, in blocks
    pub ring_blocks: usize,
    /// An input stream with no callbacks for this long is treated as lost
    pub stall_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 1024,
            failure_threshold: 5,
            ring_blocks: 16,
            stall_timeout_ms: 1000,
        }
    }
}

impl AudioConfig {
    pub fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }

    /// Never shorter than two block periods.
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
            .max(self.block_period() * 2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Power of two
    pub fft_size: usize,
    /// New samples required between two snapshots once the window is full
    pub hop_size: usize,
    pub bucket_count: usize,
    pub min_frequency: f32,
    pub max_frequency: f32,
    pub floor_db: f32,
    pub ceiling_db: f32,
    /// 0.0 -> 1.0, weight of the newest cycle
    pub smoothing: f32,
    pub peak_hold_cycles: u32,
    pub peak_decay: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            hop_size: 1024,
            bucket_count: 64,
            min_frequency: 20.0,
            max_frequency: 20_000.0,
            floor_db: -80.0,
            ceiling_db: -20.0,
            smoothing: 0.08,
            peak_hold_cycles: 25,
            peak_decay: 0.92,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub queue_capacity: usize,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollConfig {
    pub retention_ms: u64,
    pub stuck_note_timeout_ms: u64,
    pub initial_speed: f32,
    pub initial_delay_ms: u64,
    /// Closed records kept at most, oldest dropped first
    pub max_records: usize,
}

impl Default for RollConfig {
    fn default() -> Self {
        Self {
            retention_ms: 10_000,
            stuck_note_timeout_ms: 8_000,
            initial_speed: 1.0,
            initial_delay_ms: 0,
            max_records: 4096,
        }
    }
}

impl RollConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn stuck_note_timeout(&self) -> Duration {
        Duration::from_millis(self.stuck_note_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub visible_window_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            visible_window_ms: 5_000,
        }
    }
}

impl RenderConfig {
    pub fn visible_window(&self) -> Duration {
        Duration::from_millis(self.visible_window_ms)
    }
}

impl Config {
    /// Reads a RON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ron_string = fs::read_to_string(path)?;
        Self::parse(&ron_string)
    }

    pub fn parse(ron_string: &str) -> Result<Self, ConfigError> {
        let config: Config = ron::from_str(ron_string)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let text = "(audio: (block_size: 512), roll: (stuck_note_timeout_ms: 3000))";
        let config = Config::parse(text).unwrap();

        assert_eq!(config.audio.block_size, 512);
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.roll.stuck_note_timeout(), Duration::from_secs(3));
        assert_eq!(config.spectrum, SpectrumConfig::default());
        assert_eq!(config.midi.queue_capacity, 256);
    }

    #[test]
    fn empty_config_is_default() {
        assert_eq!(Config::parse("()").unwrap(), Config::default());
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(matches!(
            Config::parse("(audio: (block_size: \"big\"))"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/pianoscope.ron")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn block_period_matches_rate() {
        let audio = AudioConfig::default();
        let period = audio.block_period().as_secs_f64();
        assert!((period - 1024.0 / 44_100.0).abs() < 1e-9);
    }

    #[test]
    fn stall_timeout_covers_at_least_two_blocks() {
        let mut audio = AudioConfig::default();
        assert_eq!(audio.stall_timeout(), Duration::from_secs(1));
        audio.stall_timeout_ms = 0;
        assert_eq!(audio.stall_timeout(), audio.block_period() * 2);
    }
}
