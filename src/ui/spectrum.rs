use crate::spectrum::SpectrumSnapshot;
use eframe::egui;

const BAR_GAP: f32 = 2.0;

/// Bars for the smoothed bucket levels with a peak-hold tick above each.
pub struct SpectrumView<'a> {
    snapshot: &'a SpectrumSnapshot,
}

impl<'a> SpectrumView<'a> {
    pub fn new(snapshot: &'a SpectrumSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn show(self, ui: &mut egui::Ui, height: f32) {
        let (response, painter) = ui.allocate_painter(
            egui::Vec2::new(ui.available_width(), height),
            egui::Sense::hover(),
        );
        let rect = response.rect;
        painter.rect_filled(rect, 0.0, egui::Color32::from_rgb(12, 12, 16));

        let buckets = &self.snapshot.buckets;
        if buckets.is_empty() {
            return;
        }

        let slot = rect.width() / buckets.len() as f32;
        let bar_width = (slot - BAR_GAP).max(1.0);

        for (i, bucket) in buckets.iter().enumerate() {
            let x = rect.left() + i as f32 * slot;
            let level = bucket.level.clamp(0.0, 1.0);
            let bar = egui::Rect::from_min_max(
                egui::Pos2::new(x, rect.bottom() - level * rect.height()),
                egui::Pos2::new(x + bar_width, rect.bottom()),
            );
            let hue = i as f32 / buckets.len() as f32;
            painter.rect_filled(bar, 1.0, bar_color(hue, level));

            let peak_y = rect.bottom() - bucket.peak.clamp(0.0, 1.0) * rect.height();
            painter.line_segment(
                [egui::Pos2::new(x, peak_y), egui::Pos2::new(x + bar_width, peak_y)],
                egui::Stroke::new(1.5, egui::Color32::from_rgb(240, 240, 255)),
            );
        }

        if self.snapshot.is_empty() {
            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "No audio",
                egui::FontId::proportional(12.0),
                egui::Color32::GRAY,
            );
        }
    }
}

fn bar_color(position: f32, level: f32) -> egui::Color32 {
    let brightness = 0.45 + 0.55 * level;
    egui::Color32::from_rgb(
        ((40.0 + 180.0 * position) * brightness) as u8,
        ((200.0 - 120.0 * position) * brightness) as u8,
        ((220.0 - 40.0 * position) * brightness) as u8,
    )
}
