use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
    ControlChange { controller: u8, value: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    /// Monotonic capture time
    pub timestamp: Instant,
    pub channel: u8,
    pub message: MidiMessage,
}

impl MidiEvent {
    pub fn note_on(timestamp: Instant, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            timestamp,
            channel,
            message: MidiMessage::NoteOn { note, velocity },
        }
    }

    pub fn note_off(timestamp: Instant, channel: u8, note: u8) -> Self {
        Self {
            timestamp,
            channel,
            message: MidiMessage::NoteOff { note, velocity: 0 },
        }
    }
}

const DEFAULT_VELOCITY: u8 = 64;

/// Decodes one complete MIDI message. Anything that is not a note or
/// control change (SysEx, clock, pitch bend...) yields `None`.
pub fn decode_midi(timestamp: Instant, msg: &[u8]) -> Option<MidiEvent> {
    if msg.len() < 2 {
        return None;
    }
    let status = msg[0];
    let channel = status & 0x0F;
    let data1 = msg[1] & 0x7F;
    let data2 = msg.get(2).map(|v| v & 0x7F);

    let message = match status & 0xF0 {
        0x90 => match data2.unwrap_or(DEFAULT_VELOCITY) {
            0 => MidiMessage::NoteOff {
                note: data1,
                velocity: 0,
            },
            velocity => MidiMessage::NoteOn {
                note: data1,
                velocity,
            },
        },
        0x80 => MidiMessage::NoteOff {
            note: data1,
            velocity: data2.unwrap_or(0),
        },
        0xB0 => MidiMessage::ControlChange {
            controller: data1,
            value: data2?,
        },
        _ => return None,
    };

    Some(MidiEvent {
        timestamp,
        channel,
        message,
    })
}
