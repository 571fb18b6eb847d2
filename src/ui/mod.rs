mod piano_roll;
mod spectrum;

use crate::devices::{DeviceDescriptor, DeviceKind};
use crate::piano_roll::{MAX_SPEED, MIN_SPEED};
use crate::{Error, Session};
use eframe::egui;
use piano_roll::PianoRollView;
use spectrum::SpectrumView;
use std::time::{Duration, Instant};

const SPEED_STEP: f32 = 0.25;
const MAX_DELAY_MS: u64 = 2000;
const SPECTRUM_HEIGHT: f32 = 140.0;

pub struct PianoscopeApp {
    session: Session,
    midi_devices: Vec<DeviceDescriptor>,
    audio_devices: Vec<DeviceDescriptor>,
    pass_through: Option<DeviceDescriptor>,
    error_message: Option<String>,
    speed: f32,
    delay_ms: u64,
}

impl PianoscopeApp {
    pub fn new(session: Session) -> Self {
        let clock = session.clock();
        let mut app = Self {
            session,
            midi_devices: Vec::new(),
            audio_devices: Vec::new(),
            pass_through: None,
            error_message: None,
            speed: clock.speed,
            delay_ms: clock.delay.as_millis() as u64,
        };
        app.refresh_devices();
        app
    }

    fn refresh_devices(&mut self) {
        self.midi_devices = self.session.devices(DeviceKind::Midi);
        self.audio_devices = self.session.devices(DeviceKind::Audio);
    }

    fn report(&mut self, result: Result<(), Error>) {
        match result {
            Ok(()) => self.error_message = None,
            Err(e) => self.error_message = Some(e.to_string()),
        }
    }

    fn process_session(&mut self) {
        self.session.update(Instant::now());
        if let Some(error) = self.session.take_error() {
            self.error_message = Some(error.to_string());
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let (space, clear, demo, mute, restart, faster, slower) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Space),
                i.key_pressed(egui::Key::C),
                i.key_pressed(egui::Key::D),
                i.key_pressed(egui::Key::M),
                i.key_pressed(egui::Key::F5),
                i.key_pressed(egui::Key::Plus) || i.key_pressed(egui::Key::Equals),
                i.key_pressed(egui::Key::Minus),
            )
        });

        if space {
            self.session.toggle_pause();
        }
        if clear {
            self.session.clear();
        }
        if demo {
            self.session.trigger_demo();
        }
        if mute {
            self.session.toggle_mute();
        }
        if restart {
            let result = self.session.restart_audio();
            self.report(result);
        }
        if faster {
            self.set_speed(self.speed + SPEED_STEP);
        }
        if slower {
            self.set_speed(self.speed - SPEED_STEP);
        }
    }

    fn set_speed(&mut self, speed: f32) {
        self.session.set_speed(speed);
        self.speed = self.session.clock().speed;
    }

    fn menu_bar(&mut self, ui: &mut egui::Ui) {
        egui::MenuBar::new().ui(ui, |ui| {
            ui.menu_button("MIDI", |ui| {
                let devices = self.midi_devices.clone();
                if devices.is_empty() {
                    ui.label("No MIDI inputs");
                }
                for device in &devices {
                    let selected = self.session.midi_source() == Some(device.name.as_str());
                    if ui.selectable_label(selected, device.name.as_str()).clicked() {
                        let result = self.session.open_midi(device);
                        self.report(result);
                        ui.close();
                    }
                }

                ui.separator();
                if ui.button("Demo source").clicked() {
                    self.session.open_demo();
                    ui.close();
                }
                if ui.button("Close").clicked() {
                    self.session.close_midi();
                    ui.close();
                }
            });

            ui.menu_button("Audio", |ui| {
                let devices = self.audio_devices.clone();
                ui.label("Capture from");
                for device in devices.iter().filter(|d| d.direction.is_input()) {
                    let selected = self.session.audio_input() == Some(device);
                    if ui.selectable_label(selected, device.name.as_str()).clicked() {
                        let result = self.session.open_audio(device, self.pass_through.as_ref());
                        self.report(result);
                        ui.close();
                    }
                }

                ui.separator();
                ui.menu_button("Pass-through", |ui| {
                    if ui.selectable_label(self.pass_through.is_none(), "None").clicked() {
                        self.pass_through = None;
                        ui.close();
                    }
                    for device in devices.iter().filter(|d| d.direction.is_output()) {
                        let selected = self.pass_through.as_ref() == Some(device);
                        if ui.selectable_label(selected, device.name.as_str()).clicked() {
                            self.pass_through = Some(device.clone());
                            ui.close();
                        }
                    }
                });

                ui.separator();
                if ui.button("Restart (F5)").clicked() {
                    let result = self.session.restart_audio();
                    self.report(result);
                    ui.close();
                }
                if ui.button("Close").clicked() {
                    self.session.close_audio();
                    ui.close();
                }
            });

            if ui.button("⟳ Refresh devices").clicked() {
                self.refresh_devices();
            }
        });
    }

    fn transport_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if self.session.clock().paused {
                if ui.button("▶ Play").clicked() {
                    self.session.resume();
                }
            } else if ui.button("⏸ Pause").clicked() {
                self.session.pause();
            }

            if ui.button("Clear").clicked() {
                self.session.clear();
            }
            if ui.button("Demo").clicked() {
                self.session.trigger_demo();
            }

            let mut muted = self.session.is_muted();
            if ui.checkbox(&mut muted, "Mute").changed() {
                self.session.set_muted(muted);
            }

            ui.separator();
            let mut speed = self.speed;
            if ui
                .add(egui::Slider::new(&mut speed, MIN_SPEED..=MAX_SPEED).text("Speed"))
                .changed()
            {
                self.set_speed(speed);
            }

            if ui
                .add(egui::Slider::new(&mut self.delay_ms, 0..=MAX_DELAY_MS).text("Delay (ms)"))
                .changed()
            {
                self.session
                    .set_delay_compensation(Duration::from_millis(self.delay_ms));
            }
        });
    }

    fn status_line(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label(format!(
                "MIDI: {}",
                self.session.midi_source().unwrap_or("none")
            ));
            ui.separator();
            let audio = match self.session.audio_input() {
                Some(input) if self.session.is_audio_open() => input.name.clone(),
                _ => "closed".to_string(),
            };
            ui.label(format!("Audio: {audio}"));
            if self.session.is_muted() {
                ui.label("(muted)");
            }
            let dropped = self.session.dropped_events();
            if dropped > 0 {
                ui.separator();
                ui.colored_label(egui::Color32::YELLOW, format!("{dropped} MIDI events dropped"));
            }
        });
    }
}

impl eframe::App for PianoscopeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_session();
        self.handle_shortcuts(ctx);

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            self.menu_bar(ui);
            self.transport_controls(ui);
        });

        if let Some(ref error) = self.error_message {
            egui::TopBottomPanel::top("error").show(ctx, |ui| {
                ui.colored_label(egui::Color32::RED, error);
            });
        }

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            self.status_line(ui);
        });

        let frame = self.session.frame();

        egui::TopBottomPanel::bottom("spectrum")
            .exact_height(SPECTRUM_HEIGHT)
            .show(ctx, |ui| {
                SpectrumView::new(&frame.spectrum).show(ui, SPECTRUM_HEIGHT);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            PianoRollView::new(&frame).show(ui);
        });

        ctx.request_repaint();
    }
}
