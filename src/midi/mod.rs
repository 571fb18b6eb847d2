mod demo;
mod queue;

pub use demo::{DemoMidiSource, DemoScript, DemoStep, ScriptedEvent};
pub use queue::{MidiReceiver, MidiSender, MidiSignal, midi_queue};

use midir::{Ignore, MidiInput, MidiInputConnection};
use std::time::Instant;

use crate::devices::{DeviceDescriptor, DeviceKind, MIDI_CLIENT_NAME};
use crate::error::{Error, Result};
use crate::events::decode_midi;

/// A hardware MIDI input port. Decoding happens on midir's callback thread
/// and lands in the shared queue.
pub struct DeviceMidiSource {
    descriptor: DeviceDescriptor,
    conn: Option<MidiInputConnection<()>>,
}

impl DeviceMidiSource {
    pub fn open(descriptor: &DeviceDescriptor, sender: MidiSender) -> Result<Self> {
        let name = descriptor.name.as_str();
        if descriptor.kind != DeviceKind::Midi || !descriptor.direction.is_input() {
            return Err(Error::unavailable(name, "not a MIDI input"));
        }

        let mut midi_in =
            MidiInput::new(MIDI_CLIENT_NAME).map_err(|e| Error::unavailable(name, e))?;
        midi_in.ignore(Ignore::All);

        // the descriptor may be stale: resolve it against the current port list
        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).is_ok_and(|n| n.trim() == name))
            .ok_or_else(|| Error::unavailable(name, "device disconnected"))?;

        let conn = midi_in
            .connect(
                &port,
                "pianoscope-input",
                move |_stamp, msg, _| {
                    if let Some(event) = decode_midi(Instant::now(), msg) {
                        sender.push(event);
                    }
                },
                (),
            )
            .map_err(|e| Error::unavailable(name, e))?;

        tracing::info!("Connected MIDI input {name}");
        Ok(Self {
            descriptor: descriptor.clone(),
            conn: Some(conn),
        })
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
            tracing::info!("Disconnected MIDI input {}", self.descriptor.name);
        }
    }
}

impl Drop for DeviceMidiSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// The two flavours of event source behind one capability set.
pub enum MidiSource {
    Device(DeviceMidiSource),
    Demo(DemoMidiSource),
}

impl MidiSource {
    pub fn name(&self) -> &str {
        match self {
            MidiSource::Device(source) => &source.descriptor.name,
            MidiSource::Demo(_) => "Demo",
        }
    }

    /// Only the demo source has something to replay.
    pub fn trigger_demo(&mut self) -> bool {
        match self {
            MidiSource::Device(_) => false,
            MidiSource::Demo(source) => {
                source.trigger();
                true
            }
        }
    }

    /// Idempotent.
    pub fn close(&mut self) {
        match self {
            MidiSource::Device(source) => source.close(),
            MidiSource::Demo(source) => source.close(),
        }
    }
}
