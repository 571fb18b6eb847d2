use std::time::{Duration, Instant};

use crate::config::Config;
use crate::devices::{self, DeviceDescriptor, DeviceKind};
use crate::engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
use crate::error::{Error, Result};
use crate::midi::{MidiReceiver, MidiSignal, midi_queue};
use crate::piano_roll::{PianoRoll, PlaybackClock};
use crate::render::{Frame, compose};

/// Everything the program holds between startup and shutdown: config, the
/// device engine, the roll, and the user's current selections.
pub struct Session {
    config: Config,
    engine: EngineHandle,
    roll: PianoRoll,
    midi_rx: MidiReceiver,
    midi_source: Option<String>,
    audio_input: Option<DeviceDescriptor>,
    audio_output: Option<DeviceDescriptor>,
    audio_open: bool,
    muted: bool,
    dropped_events: u64,
    last_error: Option<Error>,
    last_update: Instant,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let (midi_tx, midi_rx) = midi_queue(config.midi.queue_capacity);
        let engine = spawn_engine(config.clone(), midi_tx);
        let roll = PianoRoll::new(&config.roll);

        Self {
            config,
            engine,
            roll,
            midi_rx,
            midi_source: None,
            audio_input: None,
            audio_output: None,
            audio_open: false,
            muted: false,
            dropped_events: 0,
            last_error: None,
            last_update: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Advances the clock to `now` and applies pending MIDI in arrival order,
    /// each event placed by its capture time within the elapsed frame.
    pub fn update(&mut self, now: Instant) {
        self.process_engine_updates();

        let delta = now.saturating_duration_since(self.last_update);
        self.last_update = now;
        self.roll.advance(delta);
        self.roll.anchor(now);

        for signal in self.midi_rx.drain() {
            match signal {
                MidiSignal::Event(event) => self.roll.on_midi_event(&event),
                MidiSignal::Overrun { dropped } => {
                    tracing::warn!(dropped, "MIDI queue overrun; oldest events dropped");
                    self.dropped_events += dropped;
                }
            }
        }
        self.roll.housekeep();
    }

    fn process_engine_updates(&mut self) {
        while let Some(update) = self.engine.try_update() {
            match update {
                EngineUpdate::MidiOpened { name } => self.midi_source = Some(name),
                EngineUpdate::MidiClosed => self.midi_source = None,
                EngineUpdate::AudioOpened { .. } => self.audio_open = true,
                EngineUpdate::AudioClosed => self.audio_open = false,
                EngineUpdate::StreamFailure(error) => {
                    self.audio_open = false;
                    self.last_error = Some(error);
                }
            }
        }
    }

    pub fn frame(&self) -> Frame {
        compose(
            &self.roll,
            self.engine.spectrum(),
            self.config.render.visible_window(),
        )
    }

    /// Query failures are surfaced as an empty list plus a pending error.
    pub fn devices(&mut self, kind: DeviceKind) -> Vec<DeviceDescriptor> {
        match devices::list_devices(kind) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("{e}");
                self.last_error = Some(e);
                Vec::new()
            }
        }
    }

    pub fn open_midi(&mut self, device: &DeviceDescriptor) -> Result<()> {
        let device = device.clone();
        self.engine
            .request(|reply| EngineCommand::OpenMidi { device, reply })
    }

    pub fn open_demo(&mut self) {
        self.engine.send(EngineCommand::OpenDemo);
    }

    pub fn close_midi(&mut self) {
        self.engine.send(EngineCommand::CloseMidi);
    }

    pub fn trigger_demo(&mut self) {
        self.engine.send(EngineCommand::TriggerDemo);
    }

    pub fn open_audio(
        &mut self,
        input: &DeviceDescriptor,
        output: Option<&DeviceDescriptor>,
    ) -> Result<()> {
        let (input, output) = (input.clone(), output.cloned());
        self.engine.request(|reply| EngineCommand::OpenAudio {
            input: input.clone(),
            output: output.clone(),
            reply,
        })?;
        self.audio_input = Some(input);
        self.audio_output = output;
        Ok(())
    }

    pub fn close_audio(&mut self) {
        self.engine.send(EngineCommand::CloseAudio);
    }

    pub fn restart_audio(&mut self) -> Result<()> {
        self.engine
            .request(|reply| EngineCommand::RestartAudio { reply })
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.engine.send(EngineCommand::SetMuted(muted));
    }

    /// Returns the new mute state.
    pub fn toggle_mute(&mut self) -> bool {
        self.set_muted(!self.muted);
        self.muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn pause(&mut self) {
        self.roll.pause();
    }

    pub fn resume(&mut self) {
        self.roll.resume();
    }

    pub fn toggle_pause(&mut self) {
        self.roll.toggle_pause();
    }

    pub fn clear(&mut self) {
        self.roll.clear();
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.roll.set_speed(speed);
    }

    pub fn set_delay_compensation(&mut self, delay: Duration) {
        self.roll.set_delay_compensation(delay);
    }

    pub fn clock(&self) -> PlaybackClock {
        self.roll.clock()
    }

    pub fn midi_source(&self) -> Option<&str> {
        self.midi_source.as_deref()
    }

    pub fn audio_input(&self) -> Option<&DeviceDescriptor> {
        self.audio_input.as_ref()
    }

    pub fn audio_output(&self) -> Option<&DeviceDescriptor> {
        self.audio_output.as_ref()
    }

    pub fn is_audio_open(&self) -> bool {
        self.audio_open
    }

    /// MIDI events lost to queue overruns so far.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    pub fn shutdown(&mut self) {
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Direction;

    #[test]
    fn failed_audio_open_keeps_the_previous_selection() {
        let mut session = Session::new(Config::default());
        let keys = DeviceDescriptor::new(DeviceKind::Midi, Direction::Input, "Keys");
        let speakers = DeviceDescriptor::new(DeviceKind::Audio, Direction::Output, "Speakers");

        assert!(session.open_audio(&keys, Some(&speakers)).is_err());
        assert_eq!(session.audio_input(), None);
        assert_eq!(session.audio_output(), None);
        assert!(!session.is_audio_open());
    }

    #[test]
    fn demo_notes_reach_the_frame() {
        let mut session = Session::new(Config::default());
        session.trigger_demo();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut frame = session.frame();
        while frame.notes.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            session.update(Instant::now());
            frame = session.frame();
        }

        assert_eq!(frame.notes[0].note, 60);
        assert_eq!(session.midi_source(), Some("Demo"));
        assert_eq!(session.dropped_events(), 0);
    }

    #[test]
    fn transport_controls_reach_the_clock() {
        let mut session = Session::new(Config::default());
        let start = Instant::now();
        session.update(start);
        session.clear();

        session.set_speed(2.0);
        session.update(start + Duration::from_millis(500));
        assert_eq!(session.clock().virtual_time, Duration::from_millis(1000));

        session.pause();
        session.update(start + Duration::from_millis(900));
        assert_eq!(session.clock().virtual_time, Duration::from_millis(1000));

        session.set_delay_compensation(Duration::from_millis(300));
        assert_eq!(session.frame().position, Duration::from_millis(700));

        session.clear();
        assert_eq!(session.clock().virtual_time, Duration::ZERO);
        assert!(session.clock().paused);
    }

    #[test]
    fn mute_toggles_and_restart_needs_a_device() {
        let mut session = Session::new(Config::default());
        assert!(session.toggle_mute());
        assert!(!session.toggle_mute());
        assert!(matches!(
            session.restart_audio(),
            Err(Error::DeviceUnavailable { .. })
        ));
        assert!(!session.is_audio_open());
    }
}
