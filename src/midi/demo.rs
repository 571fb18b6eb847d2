use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::MidiSender;
use crate::events::MidiEvent;

const DEMO_CHANNEL: u8 = 0;
/// Upper bound on how long a stop request waits for the player thread
const STOP_GRANULARITY: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoStep {
    pub note: u8,
    pub velocity: u8,
    pub duration: Duration,
    /// Gap between this note's release and the next note's onset
    pub pause_after: Duration,
}

impl DemoStep {
    pub const fn new(note: u8, velocity: u8, duration_ms: u64, pause_after_ms: u64) -> Self {
        Self {
            note,
            velocity,
            duration: Duration::from_millis(duration_ms),
            pause_after: Duration::from_millis(pause_after_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedEvent {
    pub offset: Duration,
    pub note: u8,
    pub velocity: u8,
    pub is_note_on: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoScript {
    steps: Vec<DemoStep>,
}

impl Default for DemoScript {
    /// C major scale, then four arpeggiated chords.
    fn default() -> Self {
        Self::new(vec![
            DemoStep::new(60, 80, 300, 100),
            DemoStep::new(62, 75, 300, 100),
            DemoStep::new(64, 85, 300, 100),
            DemoStep::new(65, 70, 300, 100),
            DemoStep::new(67, 90, 300, 100),
            DemoStep::new(69, 75, 300, 100),
            DemoStep::new(71, 80, 300, 100),
            DemoStep::new(72, 95, 500, 200),
            DemoStep::new(60, 70, 800, 50),
            DemoStep::new(64, 70, 800, 50),
            DemoStep::new(67, 70, 800, 300),
            DemoStep::new(65, 75, 800, 50),
            DemoStep::new(69, 75, 800, 50),
            DemoStep::new(72, 75, 800, 300),
            DemoStep::new(62, 80, 800, 50),
            DemoStep::new(66, 80, 800, 50),
            DemoStep::new(69, 80, 800, 300),
            DemoStep::new(67, 85, 1000, 50),
            DemoStep::new(71, 85, 1000, 50),
            DemoStep::new(74, 85, 1000, 500),
        ])
    }
}

impl DemoScript {
    pub fn new(steps: Vec<DemoStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[DemoStep] {
        &self.steps
    }

    /// Every note on/off with its offset from the trigger, sorted by offset.
    /// At equal offsets releases come first so a re-struck key is not cut.
    pub fn timeline(&self) -> Vec<ScriptedEvent> {
        let mut events = Vec::with_capacity(self.steps.len() * 2);
        let mut onset = Duration::ZERO;
        for step in &self.steps {
            events.push(ScriptedEvent {
                offset: onset,
                note: step.note,
                velocity: step.velocity,
                is_note_on: true,
            });
            events.push(ScriptedEvent {
                offset: onset + step.duration,
                note: step.note,
                velocity: 0,
                is_note_on: false,
            });
            onset += step.duration + step.pause_after;
        }
        events.sort_by_key(|e| (e.offset, e.is_note_on));
        events
    }

    /// Time from trigger until the last release.
    pub fn duration(&self) -> Duration {
        self.timeline()
            .iter()
            .map(|e| e.offset)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

/// Synthetic MIDI source that replays a [`DemoScript`] on a player thread.
pub struct DemoMidiSource {
    script: Arc<DemoScript>,
    sender: MidiSender,
    player: Option<Player>,
}

struct Player {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DemoMidiSource {
    pub fn open(script: DemoScript, sender: MidiSender) -> Self {
        Self {
            script: Arc::new(script),
            sender,
            player: None,
        }
    }

    /// Starts playing the script from the top, cancelling a run in progress.
    pub fn trigger(&mut self) {
        self.stop_player();

        let stop = Arc::new(AtomicBool::new(false));
        let script = self.script.clone();
        let sender = self.sender.clone();
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || play_script(&script, &sender, &stop_flag));

        self.player = Some(Player { stop, handle });
    }

    pub fn is_playing(&self) -> bool {
        self.player
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    pub fn close(&mut self) {
        self.stop_player();
    }

    fn stop_player(&mut self) {
        if let Some(player) = self.player.take() {
            player.stop.store(true, Ordering::Relaxed);
            if player.handle.join().is_err() {
                tracing::warn!("demo player thread panicked");
            }
        }
    }
}

impl Drop for DemoMidiSource {
    fn drop(&mut self) {
        self.stop_player();
    }
}

fn play_script(script: &DemoScript, sender: &MidiSender, stop: &AtomicBool) {
    let started = Instant::now();
    for scripted in script.timeline() {
        let due = started + scripted.offset;
        loop {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let now = Instant::now();
            if now >= due {
                break;
            }
            thread::sleep((due - now).min(STOP_GRANULARITY));
        }

        let now = Instant::now();
        let event = if scripted.is_note_on {
            MidiEvent::note_on(now, DEMO_CHANNEL, scripted.note, scripted.velocity)
        } else {
            MidiEvent::note_off(now, DEMO_CHANNEL, scripted.note)
        };
        sender.push(event);
    }
}
