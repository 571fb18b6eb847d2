pub mod audio;
pub mod config;
pub mod devices;
pub mod engine;
pub mod error;
pub mod events;
pub mod midi;
pub mod piano_roll;
pub mod render;
pub mod session;
pub mod spectrum;
mod ui;

pub use config::{Config, DEFAULT_CONFIG_FILE};
pub use devices::{DeviceDescriptor, DeviceKind, Direction, list_devices};
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{ConfigError, Error, Result};
pub use events::{MidiEvent, MidiMessage};
pub use piano_roll::{NoteRecord, PianoRoll, PlaybackClock};
pub use render::{Frame, NoteSpan, compose};
pub use session::Session;
pub use spectrum::{SpectrumAnalyzer, SpectrumReader, SpectrumSnapshot};
pub use ui::PianoscopeApp;
