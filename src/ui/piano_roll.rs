use crate::render::{self, Frame, HIGHEST_NOTE, KEY_COUNT, LOWEST_NOTE, NoteSpan, VELOCITY_LEVELS};
use eframe::egui;

const KEYBOARD_HEIGHT: f32 = 70.0;
const BLACK_KEY_DEPTH: f32 = 0.62;

/// Scrolling waterfall: the keyboard sits at the bottom, the now line on its
/// top edge, and older notes climb towards the top of the panel.
pub struct PianoRollView<'a> {
    frame: &'a Frame,
}

impl<'a> PianoRollView<'a> {
    pub fn new(frame: &'a Frame) -> Self {
        Self { frame }
    }

    pub fn show(self, ui: &mut egui::Ui) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::hover());
        let rect = response.rect;

        let roll_rect = egui::Rect::from_min_max(
            rect.min,
            egui::Pos2::new(rect.right(), rect.bottom() - KEYBOARD_HEIGHT),
        );
        let keys_rect = egui::Rect::from_min_max(
            egui::Pos2::new(rect.left(), roll_rect.bottom()),
            rect.max,
        );

        painter.rect_filled(roll_rect, 0.0, egui::Color32::from_rgb(18, 18, 24));
        self.draw_lanes(&painter, roll_rect);
        self.draw_notes(&painter, roll_rect);
        self.draw_keyboard(&painter, keys_rect);

        painter.line_segment(
            [roll_rect.left_bottom(), roll_rect.right_bottom()],
            egui::Stroke::new(2.0, egui::Color32::from_rgb(230, 230, 240)),
        );
    }

    fn key_width(rect: egui::Rect) -> f32 {
        rect.width() / KEY_COUNT as f32
    }

    fn key_x(note: u8, rect: egui::Rect) -> Option<f32> {
        render::key_index(note).map(|i| rect.left() + i as f32 * Self::key_width(rect))
    }

    fn draw_lanes(&self, painter: &egui::Painter, rect: egui::Rect) {
        let width = Self::key_width(rect);
        for note in LOWEST_NOTE..=HIGHEST_NOTE {
            let Some(x) = Self::key_x(note, rect) else {
                continue;
            };
            if render::is_black_key(note) {
                let lane = egui::Rect::from_min_size(
                    egui::Pos2::new(x, rect.top()),
                    egui::Vec2::new(width, rect.height()),
                );
                painter.rect_filled(lane, 0.0, egui::Color32::from_rgb(14, 14, 19));
            }
            if note % 12 == 0 {
                painter.line_segment(
                    [egui::Pos2::new(x, rect.top()), egui::Pos2::new(x, rect.bottom())],
                    egui::Stroke::new(1.0, egui::Color32::from_rgb(40, 40, 52)),
                );
            }
        }
    }

    fn draw_notes(&self, painter: &egui::Painter, rect: egui::Rect) {
        let width = Self::key_width(rect);
        for span in &self.frame.notes {
            let Some(x) = Self::key_x(span.note, rect) else {
                continue;
            };
            let bottom = rect.bottom() - span.newest * rect.height();
            let top = rect.bottom() - span.oldest * rect.height();
            let note_rect = egui::Rect::from_min_max(
                egui::Pos2::new(x + 1.0, top),
                egui::Pos2::new(x + width - 1.0, bottom.max(top + 2.0)),
            );

            painter.rect_filled(note_rect, 2.0, velocity_color(span.level));
            if span.sounding {
                painter.rect_stroke(
                    note_rect,
                    2.0,
                    egui::Stroke::new(1.0, egui::Color32::WHITE),
                    egui::StrokeKind::Inside,
                );
            }
        }
    }

    fn draw_keyboard(&self, painter: &egui::Painter, rect: egui::Rect) {
        let width = Self::key_width(rect);
        let sounding: Vec<&NoteSpan> = self.frame.notes.iter().filter(|n| n.sounding).collect();
        let held = |note: u8| sounding.iter().rev().find(|n| n.note == note);

        for note in LOWEST_NOTE..=HIGHEST_NOTE {
            let Some(x) = Self::key_x(note, rect) else {
                continue;
            };
            let is_black_key = render::is_black_key(note);
            let height = if is_black_key {
                rect.height() * BLACK_KEY_DEPTH
            } else {
                rect.height()
            };
            let key_rect = egui::Rect::from_min_size(
                egui::Pos2::new(x, rect.top()),
                egui::Vec2::new(width, height),
            );

            let key_color = match held(note) {
                Some(span) => velocity_color(span.level),
                None if is_black_key => egui::Color32::from_rgb(20, 20, 20),
                None => egui::Color32::from_rgb(200, 200, 200),
            };

            painter.rect_filled(key_rect, 0.0, key_color);
            painter.rect_stroke(
                key_rect,
                0.0,
                egui::Stroke::new(1.0, egui::Color32::from_rgb(100, 100, 100)),
                egui::StrokeKind::Inside,
            );

            // Label C notes
            if note % 12 == 0 {
                painter.text(
                    egui::Pos2::new(key_rect.center().x, key_rect.bottom() - 8.0),
                    egui::Align2::CENTER_CENTER,
                    render::note_name(note),
                    egui::FontId::proportional(9.0),
                    egui::Color32::BLACK,
                );
            }
        }
    }
}

/// Cool-to-hot gradient over the velocity levels.
fn velocity_color(level: u8) -> egui::Color32 {
    let t = level.min(VELOCITY_LEVELS - 1) as f32 / (VELOCITY_LEVELS - 1) as f32;
    egui::Color32::from_rgb(
        (60.0 + 195.0 * t) as u8,
        (140.0 - 60.0 * t) as u8,
        (230.0 - 130.0 * t) as u8,
    )
}
