//! Per-frame composition of roll and spectrum state into plain data a
//! painter can draw without touching the model.

use std::sync::Arc;
use std::time::Duration;

use crate::piano_roll::{NoteRecord, PianoRoll, PlaybackClock};
use crate::spectrum::{SpectrumReader, SpectrumSnapshot};

/// A0
pub const LOWEST_NOTE: u8 = 21;
/// C8
pub const HIGHEST_NOTE: u8 = 108;
pub const KEY_COUNT: usize = (HIGHEST_NOTE - LOWEST_NOTE) as usize + 1;
pub const VELOCITY_LEVELS: u8 = 10;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Position of `note` on the 88-key keyboard, `None` off the keyboard.
pub fn key_index(note: u8) -> Option<usize> {
    (LOWEST_NOTE..=HIGHEST_NOTE)
        .contains(&note)
        .then(|| (note - LOWEST_NOTE) as usize)
}

pub fn is_black_key(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}

/// Scientific pitch name, middle C (60) is `C4`.
pub fn note_name(note: u8) -> String {
    let octave = note as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], octave)
}

pub fn velocity_level(velocity: u8) -> u8 {
    (velocity / 13).min(VELOCITY_LEVELS - 1)
}

/// One note as it appears in the visible window. Vertical coordinates are
/// normalised ages: 0.0 is the now line, 1.0 the oldest visible instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteSpan {
    pub note: u8,
    pub channel: u8,
    pub velocity: u8,
    pub level: u8,
    /// Age of the release, clamped to the window
    pub newest: f32,
    /// Age of the onset, clamped to the window
    pub oldest: f32,
    pub sounding: bool,
}

impl NoteSpan {
    fn from_record(record: &NoteRecord, position: Duration, window: Duration) -> Self {
        let window_secs = window.as_secs_f32().max(f32::EPSILON);
        let age = |t: Duration| (position.saturating_sub(t).as_secs_f32() / window_secs).min(1.0);

        let sounding = record.end.is_none_or(|end| end > position);
        let release = record.end.map_or(position, |end| end.min(position));

        Self {
            note: record.note,
            channel: record.channel,
            velocity: record.velocity,
            level: velocity_level(record.velocity),
            newest: age(release),
            oldest: age(record.start),
            sounding,
        }
    }

    pub fn key_index(&self) -> Option<usize> {
        key_index(self.note)
    }
}

/// Everything one redraw needs.
#[derive(Debug, Clone)]
pub struct Frame {
    pub position: Duration,
    pub clock: PlaybackClock,
    pub window: Duration,
    /// Notes on the 88-key range, ordered by onset
    pub notes: Vec<NoteSpan>,
    pub spectrum: Arc<SpectrumSnapshot>,
}

impl Frame {
    pub fn sounding_keys(&self) -> impl Iterator<Item = u8> + '_ {
        self.notes.iter().filter(|n| n.sounding).map(|n| n.note)
    }
}

/// Samples both producers once. Never mutates either.
pub fn compose(roll: &PianoRoll, spectrum: &SpectrumReader, window: Duration) -> Frame {
    let clock = roll.clock();
    let position = clock.position();

    let notes = roll
        .snapshot(window)
        .iter()
        .filter(|r| key_index(r.note).is_some())
        .map(|r| NoteSpan::from_record(r, position, window))
        .collect();

    Frame {
        position,
        clock,
        window,
        notes,
        spectrum: spectrum.latest(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RollConfig, SpectrumConfig};
    use crate::events::MidiEvent;
    use crate::spectrum::SpectrumAnalyzer;
    use std::time::Instant;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn keyboard_layout() {
        assert_eq!(KEY_COUNT, 88);
        assert_eq!(key_index(21), Some(0));
        assert_eq!(key_index(108), Some(87));
        assert_eq!(key_index(20), None);
        assert_eq!(key_index(109), None);

        let black = (LOWEST_NOTE..=HIGHEST_NOTE).filter(|n| is_black_key(*n)).count();
        assert_eq!(black, 36);
        assert!(is_black_key(61));
        assert!(!is_black_key(60));
    }

    #[test]
    fn names_follow_scientific_pitch() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(21), "A0");
        assert_eq!(note_name(54), "F#3");
        assert_eq!(note_name(108), "C8");
    }

    #[test]
    fn velocity_maps_to_ten_levels() {
        assert_eq!(velocity_level(0), 0);
        assert_eq!(velocity_level(12), 0);
        assert_eq!(velocity_level(13), 1);
        assert_eq!(velocity_level(127), 9);
    }

    #[test]
    fn compose_places_notes_by_age() {
        let mut roll = PianoRoll::new(&RollConfig::default());
        let analyzer = SpectrumAnalyzer::new(&SpectrumConfig::default(), 44_100);
        let reader = analyzer.reader();

        roll.advance(ms(1000));
        roll.on_midi_event(&MidiEvent::note_on(Instant::now(), 0, 60, 100));
        roll.advance(ms(1000));
        roll.on_midi_event(&MidiEvent::note_off(Instant::now(), 0, 60));
        roll.on_midi_event(&MidiEvent::note_on(Instant::now(), 0, 64, 40));
        roll.on_midi_event(&MidiEvent::note_on(Instant::now(), 0, 5, 40));
        roll.advance(ms(1000));

        let frame = compose(&roll, &reader, ms(4000));
        assert_eq!(frame.position, ms(3000));
        assert!(frame.spectrum.is_empty());
        assert_eq!(frame.notes.len(), 2);

        let c4 = frame.notes[0];
        assert_eq!(c4.note, 60);
        assert!(!c4.sounding);
        assert!((c4.oldest - 0.5).abs() < 1e-4);
        assert!((c4.newest - 0.25).abs() < 1e-4);

        let e4 = frame.notes[1];
        assert!(e4.sounding);
        assert_eq!(e4.newest, 0.0);
        assert_eq!(e4.level, 3);
        assert_eq!(frame.sounding_keys().collect::<Vec<_>>(), vec![64]);
    }

    #[test]
    fn onsets_older_than_the_window_are_clamped() {
        let mut roll = PianoRoll::new(&RollConfig::default());
        let reader = SpectrumAnalyzer::new(&SpectrumConfig::default(), 44_100).reader();

        roll.on_midi_event(&MidiEvent::note_on(Instant::now(), 0, 60, 100));
        roll.advance(ms(3000));

        let frame = compose(&roll, &reader, ms(1000));
        assert_eq!(frame.notes[0].oldest, 1.0);
        assert_eq!(frame.notes[0].newest, 0.0);
    }
}
