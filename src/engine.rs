//! The device-facing thread. Owns every cpal stream and MIDI connection so
//! the UI thread only ever talks to it through channels.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::{AudioCapture, HealthFailure, HealthMonitor};
use crate::config::Config;
use crate::devices::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::midi::{DemoMidiSource, DemoScript, DeviceMidiSource, MidiSender, MidiSource};
use crate::spectrum::{AnalyzerWorker, SpectrumAnalyzer, SpectrumReader};

const HEALTH_POLL: Duration = Duration::from_millis(100);

/// One-shot channel carrying the outcome of a user-initiated open/restart.
pub type Reply = Sender<Result<()>>;

#[derive(Debug)]
pub enum EngineCommand {
    OpenMidi { device: DeviceDescriptor, reply: Reply },
    OpenDemo,
    CloseMidi,
    /// Replays the demo script, switching to the demo source if needed
    TriggerDemo,
    OpenAudio {
        input: DeviceDescriptor,
        output: Option<DeviceDescriptor>,
        reply: Reply,
    },
    CloseAudio,
    RestartAudio { reply: Reply },
    SetMuted(bool),
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    MidiOpened { name: String },
    MidiClosed,
    AudioOpened { input: String, output: Option<String> },
    AudioClosed,
    /// The audio source closed itself after repeated failures or device loss
    StreamFailure(Error),
}

pub struct EngineHandle {
    command_tx: Sender<EngineCommand>,
    update_rx: Receiver<EngineUpdate>,
    spectrum: SpectrumReader,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Fire-and-forget command.
    pub fn send(&self, command: EngineCommand) {
        if self.command_tx.send(command).is_err() {
            tracing::warn!("engine thread has stopped; command dropped");
        }
    }

    /// Sends a command carrying a reply channel and waits for its outcome.
    pub fn request(&self, command: impl FnOnce(Reply) -> EngineCommand) -> Result<()> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.command_tx
            .send(command(reply_tx))
            .map_err(|_| Error::EngineStopped)?;
        reply_rx.recv().map_err(|_| Error::EngineStopped)?
    }

    pub fn try_update(&self) -> Option<EngineUpdate> {
        self.update_rx.try_recv().ok()
    }

    pub fn spectrum(&self) -> &SpectrumReader {
        &self.spectrum
    }

    /// Closes every device and joins the thread.
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.command_tx.send(EngineCommand::Shutdown);
            if thread.join().is_err() {
                tracing::error!("engine thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn spawn_engine(config: Config, midi_tx: MidiSender) -> EngineHandle {
    let (command_tx, command_rx) = channel::unbounded();
    let (update_tx, update_rx) = channel::unbounded();

    let analyzer = SpectrumAnalyzer::new(&config.spectrum, config.audio.sample_rate);
    let spectrum = analyzer.reader();

    // cpal streams are not Send everywhere, so the state is built on the
    // thread that will own them
    let thread = std::thread::spawn(move || {
        let state = EngineState {
            config,
            midi_tx,
            midi: None,
            audio: None,
            analyzer: Some(analyzer),
            last_audio: None,
            muted: Arc::new(AtomicBool::new(false)),
            update_tx,
        };
        engine_thread(command_rx, state);
    });

    EngineHandle {
        command_tx,
        update_rx,
        spectrum,
        thread: Some(thread),
    }
}

struct AudioSession {
    capture: AudioCapture,
    worker: AnalyzerWorker,
    monitor: HealthMonitor,
    last_poll: Instant,
}

struct EngineState {
    config: Config,
    midi_tx: MidiSender,
    midi: Option<MidiSource>,
    audio: Option<AudioSession>,
    /// Parked here while no audio session runs
    analyzer: Option<SpectrumAnalyzer>,
    last_audio: Option<(DeviceDescriptor, Option<DeviceDescriptor>)>,
    muted: Arc<AtomicBool>,
    update_tx: Sender<EngineUpdate>,
}

fn engine_thread(command_rx: Receiver<EngineCommand>, mut state: EngineState) {
    loop {
        match command_rx.recv_timeout(HEALTH_POLL) {
            Ok(EngineCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => state.handle(command),
            Err(RecvTimeoutError::Timeout) => {}
        }
        state.poll_health();
    }

    state.close_midi();
    state.close_audio();
    tracing::debug!("engine thread stopped");
}

impl EngineState {
    fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::OpenMidi { device, reply } => {
                let result = self.open_midi(&device);
                if let Err(e) = &result {
                    tracing::warn!("Failed to open MIDI input: {e}");
                }
                let _ = reply.send(result);
            }
            EngineCommand::OpenDemo => self.open_demo(),
            EngineCommand::CloseMidi => self.close_midi(),
            EngineCommand::TriggerDemo => {
                if !matches!(self.midi, Some(MidiSource::Demo(_))) {
                    self.open_demo();
                }
                if let Some(source) = &mut self.midi {
                    source.trigger_demo();
                    tracing::info!("Demo sequence started");
                }
            }
            EngineCommand::OpenAudio {
                input,
                output,
                reply,
            } => {
                let result = self.open_audio(input, output);
                if let Err(e) = &result {
                    tracing::warn!("Failed to open audio: {e}");
                }
                let _ = reply.send(result);
            }
            EngineCommand::CloseAudio => self.close_audio(),
            EngineCommand::RestartAudio { reply } => {
                let result = match self.last_audio.clone() {
                    Some((input, output)) => {
                        tracing::info!("Restarting audio on {}", input.name);
                        self.open_audio(input, output)
                    }
                    None => Err(Error::unavailable("audio", "no audio device has been opened")),
                };
                let _ = reply.send(result);
            }
            EngineCommand::SetMuted(muted) => {
                self.muted.store(muted, Ordering::Relaxed);
                tracing::info!("Pass-through {}", if muted { "muted" } else { "unmuted" });
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn notify(&self, update: EngineUpdate) {
        let _ = self.update_tx.send(update);
    }

    fn open_midi(&mut self, device: &DeviceDescriptor) -> Result<()> {
        self.close_midi();
        let source = DeviceMidiSource::open(device, self.midi_tx.clone())?;
        self.midi = Some(MidiSource::Device(source));
        self.notify(EngineUpdate::MidiOpened {
            name: device.name.clone(),
        });
        Ok(())
    }

    fn open_demo(&mut self) {
        self.close_midi();
        let source = DemoMidiSource::open(DemoScript::default(), self.midi_tx.clone());
        self.midi = Some(MidiSource::Demo(source));
        tracing::info!("Using demo MIDI source");
        self.notify(EngineUpdate::MidiOpened {
            name: "Demo".to_string(),
        });
    }

    fn close_midi(&mut self) {
        if let Some(mut source) = self.midi.take() {
            source.close();
            self.notify(EngineUpdate::MidiClosed);
        }
    }

    fn open_audio(
        &mut self,
        input: DeviceDescriptor,
        output: Option<DeviceDescriptor>,
    ) -> Result<()> {
        self.close_audio();
        self.last_audio = Some((input.clone(), output.clone()));

        let (capture, reader) = AudioCapture::open(
            &input,
            output.as_ref(),
            &self.config.audio,
            self.muted.clone(),
        )?;

        let mut analyzer = match self.analyzer.take() {
            Some(analyzer) => analyzer,
            None => {
                tracing::error!("spectrum analyzer was lost; the spectrum display will not update");
                SpectrumAnalyzer::new(&self.config.spectrum, self.config.audio.sample_rate)
            }
        };
        analyzer.reset();

        let monitor = HealthMonitor::new(capture.health(), self.config.audio.stall_timeout());
        self.audio = Some(AudioSession {
            capture,
            worker: AnalyzerWorker::spawn(reader, analyzer),
            monitor,
            last_poll: Instant::now(),
        });
        self.notify(EngineUpdate::AudioOpened {
            input: input.name,
            output: output.map(|o| o.name),
        });
        Ok(())
    }

    fn close_audio(&mut self) {
        if let Some(session) = self.audio.take() {
            let AudioSession {
                capture, worker, ..
            } = session;
            // streams first so nothing feeds the ring while the worker stops
            drop(capture);
            self.analyzer = worker.stop();
            self.notify(EngineUpdate::AudioClosed);
        }
    }

    fn poll_health(&mut self) {
        let Some(session) = &mut self.audio else {
            return;
        };

        let now = Instant::now();
        let status = session.capture.health();
        let report = session
            .monitor
            .check(status, now.duration_since(session.last_poll));
        session.last_poll = now;

        if report.newly_skipped > 0 {
            tracing::warn!(
                skipped = report.newly_skipped,
                consecutive = status.consecutive_failures,
                "audio stream skipped blocks"
            );
        }

        if let Some(failure) = report.failure {
            let error = failure_error(failure, &session.capture.input().name);
            tracing::error!("{error}; closing audio");
            self.close_audio();
            self.notify(EngineUpdate::StreamFailure(error));
        }
    }
}

fn failure_error(failure: HealthFailure, input: &str) -> Error {
    match failure {
        HealthFailure::Escalated { consecutive } => Error::StreamFailure {
            failures: consecutive,
        },
        HealthFailure::DeviceLost => Error::unavailable(input, "device disconnected"),
        HealthFailure::Stalled { idle } => Error::unavailable(
            input,
            format!("no audio received for {} ms", idle.as_millis()),
        ),
    }
}
