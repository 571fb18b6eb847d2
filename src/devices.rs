//! Read-only snapshots of the MIDI and audio devices the host exposes.

use cpal::traits::{DeviceTrait, HostTrait};
use midir::MidiInput;
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Midi,
    Audio,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Midi => write!(f, "MIDI"),
            DeviceKind::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
    Both,
}

impl Direction {
    pub fn is_input(self) -> bool {
        matches!(self, Direction::Input | Direction::Both)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Direction::Output | Direction::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub direction: Direction,
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    pub fn new(kind: DeviceKind, direction: Direction, name: impl Into<String>) -> Self {
        let name = name.into();
        let prefix = match kind {
            DeviceKind::Midi => "midi",
            DeviceKind::Audio => "audio",
        };
        Self {
            id: format!("{prefix}:{name}"),
            name,
            direction,
            kind,
        }
    }
}

pub(crate) const MIDI_CLIENT_NAME: &str = "pianoscope";

/// Lists the devices of one kind. Nothing is cached: the hardware may change
/// between two calls.
pub fn list_devices(kind: DeviceKind) -> Result<Vec<DeviceDescriptor>> {
    match kind {
        DeviceKind::Midi => list_midi_inputs(),
        DeviceKind::Audio => list_audio_devices(),
    }
}

fn list_midi_inputs() -> Result<Vec<DeviceDescriptor>> {
    let midi_in = MidiInput::new(MIDI_CLIENT_NAME).map_err(|e| Error::DeviceQuery {
        kind: DeviceKind::Midi,
        reason: e.to_string(),
    })?;

    let ports = midi_in.ports();
    let names = ports
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .map(|name| (name.trim().to_string(), Direction::Input));

    Ok(collect_descriptors(DeviceKind::Midi, names))
}

fn list_audio_devices() -> Result<Vec<DeviceDescriptor>> {
    let host = cpal::default_host();
    let query_error = |e: cpal::DevicesError| Error::DeviceQuery {
        kind: DeviceKind::Audio,
        reason: e.to_string(),
    };

    let inputs: Vec<String> = host
        .input_devices()
        .map_err(query_error)?
        .filter_map(|d| device_name(&d))
        .collect();
    let outputs: Vec<String> = host
        .output_devices()
        .map_err(query_error)?
        .filter_map(|d| device_name(&d))
        .collect();

    let entries = inputs
        .iter()
        .map(|name| {
            let direction = if outputs.contains(name) {
                Direction::Both
            } else {
                Direction::Input
            };
            (name.clone(), direction)
        })
        .chain(
            outputs
                .iter()
                .filter(|name| !inputs.contains(name))
                .map(|name| (name.clone(), Direction::Output)),
        );

    Ok(collect_descriptors(DeviceKind::Audio, entries))
}

/// Sorts case-insensitively and drops duplicate names, keeping the first.
fn collect_descriptors<I>(kind: DeviceKind, entries: I) -> Vec<DeviceDescriptor>
where
    I: IntoIterator<Item = (String, Direction)>,
{
    let mut descriptors: Vec<DeviceDescriptor> = Vec::new();
    for (name, direction) in entries {
        if name.is_empty() || descriptors.iter().any(|d| d.name == name) {
            continue;
        }
        descriptors.push(DeviceDescriptor::new(kind, direction, name));
    }
    descriptors.sort_by_key(|d| d.name.to_lowercase());
    descriptors
}

#[allow(deprecated)]
pub(crate) fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok().map(|n| n.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_sorted_and_deduplicated() {
        let entries = vec![
            ("usb keyboard".to_string(), Direction::Input),
            ("Arturia".to_string(), Direction::Input),
            ("usb keyboard".to_string(), Direction::Input),
            (String::new(), Direction::Input),
        ];
        let descriptors = collect_descriptors(DeviceKind::Midi, entries);

        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Arturia", "usb keyboard"]);
        assert_eq!(descriptors[0].id, "midi:Arturia");
        assert_eq!(descriptors[0].kind, DeviceKind::Midi);
    }

    #[test]
    fn direction_queries() {
        assert!(Direction::Both.is_input());
        assert!(Direction::Both.is_output());
        assert!(!Direction::Input.is_output());
        assert!(!Direction::Output.is_input());
    }
}
