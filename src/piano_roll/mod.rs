mod clock;

pub use clock::{MAX_SPEED, MIN_SPEED, PlaybackClock};

use arc_swap::ArcSwap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RollConfig;
use crate::events::{MidiEvent, MidiMessage};

/// One held note on the timeline. Times are virtual playback time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteRecord {
    pub note: u8,
    pub channel: u8,
    /// Velocity at onset
    pub velocity: u8,
    pub start: Duration,
    /// `None` while the key is held
    pub end: Option<Duration>,
    /// Ended by a re-strike or the stuck-note timeout rather than a NoteOff
    pub forced: bool,
}

impl NoteRecord {
    pub fn is_ongoing(&self) -> bool {
        self.end.is_none()
    }

    pub fn end_or(&self, now: Duration) -> Duration {
        self.end.unwrap_or(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NoteKey {
    note: u8,
    channel: u8,
}

/// Read side of the transport clock for other threads.
#[derive(Clone)]
pub struct ClockReader {
    clock: Arc<ArcSwap<PlaybackClock>>,
}

impl ClockReader {
    pub fn load(&self) -> PlaybackClock {
        **self.clock.load()
    }
}

/// Ties a wall-clock instant to the virtual time reached at that instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameAnchor {
    wall: Instant,
    virtual_time: Duration,
    /// Virtual time at the previous anchor
    frame_start: Duration,
}

/// Scrolling note history plus transport state.
pub struct PianoRoll {
    retention: Duration,
    stuck_note_timeout: Duration,
    max_records: usize,
    clock: Arc<ArcSwap<PlaybackClock>>,
    anchor: Option<FrameAnchor>,
    active: HashMap<NoteKey, NoteRecord>,
    history: VecDeque<NoteRecord>,
}

impl PianoRoll {
    pub fn new(config: &RollConfig) -> Self {
        let clock = PlaybackClock {
            delay: Duration::from_millis(config.initial_delay_ms),
            ..PlaybackClock::default()
        }
        .with_speed(config.initial_speed);

        Self {
            retention: config.retention(),
            stuck_note_timeout: config.stuck_note_timeout(),
            max_records: config.max_records.max(1),
            clock: Arc::new(ArcSwap::from_pointee(clock)),
            anchor: None,
            active: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    pub fn clock(&self) -> PlaybackClock {
        **self.clock.load()
    }

    pub fn clock_reader(&self) -> ClockReader {
        ClockReader {
            clock: self.clock.clone(),
        }
    }

    fn replace_clock(&self, f: impl FnOnce(PlaybackClock) -> PlaybackClock) {
        let next = f(self.clock());
        self.clock.store(Arc::new(next));
    }

    /// Marks `wall` as the instant the clock reached its current virtual
    /// time. Call once per frame, right after [`PianoRoll::advance`].
    pub fn anchor(&mut self, wall: Instant) {
        let virtual_time = self.clock().virtual_time;
        let frame_start = self
            .anchor
            .map_or(virtual_time, |a| a.virtual_time.min(virtual_time));
        self.anchor = Some(FrameAnchor {
            wall,
            virtual_time,
            frame_start,
        });
    }

    /// Maps a capture timestamp into the frame that just elapsed. Without a
    /// current anchor the event lands on the current virtual time.
    fn event_time(&self, timestamp: Instant) -> Duration {
        let clock = self.clock();
        match self.anchor {
            Some(anchor) if anchor.virtual_time == clock.virtual_time => {
                let behind = anchor
                    .wall
                    .saturating_duration_since(timestamp)
                    .mul_f64(clock.speed as f64);
                anchor
                    .virtual_time
                    .saturating_sub(behind)
                    .max(anchor.frame_start)
            }
            _ => clock.virtual_time,
        }
    }

    /// NoteOn opens a record (a still-held record for the same key is
    /// force-ended first); NoteOff closes the matching one. Unmatched
    /// NoteOffs and control changes leave the roll untouched.
    pub fn on_midi_event(&mut self, event: &MidiEvent) {
        let now = self.event_time(event.timestamp);

        match event.message {
            MidiMessage::NoteOn { note, velocity } => {
                let key = NoteKey {
                    note,
                    channel: event.channel,
                };
                if let Some(mut stale) = self.active.remove(&key) {
                    stale.end = Some(now.max(stale.start));
                    stale.forced = true;
                    self.history.push_back(stale);
                }
                self.active.insert(
                    key,
                    NoteRecord {
                        note,
                        channel: event.channel,
                        velocity,
                        start: now,
                        end: None,
                        forced: false,
                    },
                );
            }
            MidiMessage::NoteOff { note, .. } => {
                let key = NoteKey {
                    note,
                    channel: event.channel,
                };
                let Some(mut record) = self.active.remove(&key) else {
                    return;
                };
                record.end = Some(now.max(record.start));
                self.history.push_back(record);
            }
            MidiMessage::ControlChange { .. } => return,
        }

        self.housekeep();
    }

    /// Force-closes stuck notes, drops records that scrolled past the
    /// retention window and trims history to `max_records`.
    pub fn housekeep(&mut self) {
        let clock = self.clock();
        let now = clock.virtual_time;

        let timeout = self.stuck_note_timeout;
        let stuck: Vec<NoteKey> = self
            .active
            .iter()
            .filter(|(_, r)| now.saturating_sub(r.start) >= timeout)
            .map(|(k, _)| *k)
            .collect();
        for key in stuck {
            if let Some(mut record) = self.active.remove(&key) {
                record.end = Some(record.start + timeout);
                record.forced = true;
                tracing::debug!(
                    note = record.note,
                    channel = record.channel,
                    "force-closed stuck note"
                );
                self.history.push_back(record);
            }
        }

        let horizon = clock.position().saturating_sub(self.retention);
        self.history.retain(|r| r.end_or(now) >= horizon);

        let excess = self.history.len().saturating_sub(self.max_records);
        if excess > 0 {
            self.history.drain(..excess);
            tracing::trace!(excess, "note history trimmed");
        }
    }

    /// Moves the virtual clock. Touches no note records.
    pub fn advance(&mut self, wall_delta: Duration) {
        self.replace_clock(|c| c.advanced(wall_delta));
    }

    pub fn pause(&mut self) {
        self.replace_clock(|c| PlaybackClock { paused: true, ..c });
    }

    pub fn resume(&mut self) {
        self.replace_clock(|c| PlaybackClock { paused: false, ..c });
    }

    pub fn toggle_pause(&mut self) {
        self.replace_clock(|c| PlaybackClock {
            paused: !c.paused,
            ..c
        });
    }

    pub fn is_paused(&self) -> bool {
        self.clock().paused
    }

    /// Drops every record and rewinds to zero. Speed, delay and the paused
    /// flag are kept.
    pub fn clear(&mut self) {
        self.active.clear();
        self.history.clear();
        self.anchor = None;
        self.replace_clock(|c| PlaybackClock {
            virtual_time: Duration::ZERO,
            ..c
        });
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.replace_clock(|c| c.with_speed(speed));
    }

    pub fn set_delay_compensation(&mut self, delay: Duration) {
        self.replace_clock(|c| PlaybackClock { delay, ..c });
    }

    /// Records intersecting the `visible` span that ends at the clock
    /// position, ordered by onset.
    pub fn snapshot(&self, visible: Duration) -> Vec<NoteRecord> {
        let clock = self.clock();
        let position = clock.position();
        let window_start = position.saturating_sub(visible);

        let mut notes: Vec<NoteRecord> = self
            .history
            .iter()
            .chain(self.active.values())
            .filter(|r| r.start <= position && r.end_or(clock.virtual_time) >= window_start)
            .copied()
            .collect();
        notes.sort_by_key(|r| (r.start, r.note, r.channel));
        notes
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Every record still held, open or closed.
    pub fn len(&self) -> usize {
        self.active.len() + self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
