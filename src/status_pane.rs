// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::status::{DiagnosticLevel, SystemStatus};
use flowbase_client::ConnectionState;

const MAX_MESSAGE_CHARS: usize = 34;

#[derive(Debug)]
pub struct StatusPane {
    pub visible: bool,
    pub collapsed: bool,
}

impl Default for StatusPane {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPane {
    pub fn new() -> Self {
        Self {
            visible: true,
            collapsed: false,
        }
    }

    /// Render the status pane as a floating window
    pub fn render(&mut self, ctx: &egui::Context, status: &SystemStatus) {
        if !self.visible {
            // Show a small button to re-open the status pane when hidden
            egui::Window::new("show_status")
                .title_bar(false)
                .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(10.0, -10.0))
                .fixed_size(egui::vec2(140.0, 35.0))
                .resizable(false)
                .frame(egui::Frame::window(&ctx.style())
                    .fill(egui::Color32::from_rgba_unmultiplied(25, 30, 35, 200))
                    .stroke(egui::Stroke::new(1.0, egui::Color32::from_rgb(60, 80, 100)))
                    .corner_radius(6.0))
                .show(ctx, |ui| {
                    if ui.button(egui::RichText::new("📊 Show Status")
                        .color(egui::Color32::from_rgb(150, 200, 220))
                        .size(11.0))
                        .clicked() {
                        self.visible = true;
                    }
                });
            return;
        }

        let screen_height = ctx.screen_rect().height();

        egui::Window::new("Connection Status")
            .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(10.0, -10.0))
            .fixed_size(egui::vec2(304.0, if self.collapsed { 40.0 } else { screen_height.min(360.0) }))
            .resizable(false)
            .collapsible(false)
            .frame(egui::Frame::window(&ctx.style())
                .fill(egui::Color32::from_rgba_unmultiplied(25, 30, 35, 230))
                .stroke(egui::Stroke::new(1.0, egui::Color32::from_rgb(60, 80, 100)))
                .corner_radius(6.0))
            .show(ctx, |ui| {
                // Header with collapse and close buttons
                ui.horizontal(|ui| {
                    ui.label(egui::RichText::new("◈ STATUS")
                        .color(egui::Color32::from_rgb(100, 180, 220))
                        .size(12.0)
                        .strong());

                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button(egui::RichText::new("✕")
                            .size(12.0)
                            .color(egui::Color32::from_rgb(200, 100, 100)))
                            .on_hover_text("Hide status pane")
                            .clicked() {
                            self.visible = false;
                        }

                        ui.add_space(4.0);

                        let collapse_icon = if self.collapsed { "▼" } else { "▲" };
                        if ui.button(egui::RichText::new(collapse_icon).size(10.0))
                            .on_hover_text(if self.collapsed { "Expand" } else { "Collapse" })
                            .clicked() {
                            self.collapsed = !self.collapsed;
                        }
                    });
                });

                if self.collapsed {
                    return;
                }

                ui.separator();

                egui::ScrollArea::vertical()
                    .max_height(screen_height.min(310.0))
                    .show(ui, |ui| {
                        render_connection_section(ui, status);
                        ui.add_space(6.0);
                        render_metrics_section(ui, status);
                        ui.add_space(6.0);
                        render_diagnostics_section(ui, status);
                    });
            });
    }
}

fn section_label(ui: &mut egui::Ui, text: &str) {
    ui.label(egui::RichText::new(text)
        .color(egui::Color32::from_rgb(150, 150, 150))
        .size(10.0)
        .strong());
    ui.add_space(3.0);
}

fn metric_row(ui: &mut egui::Ui, label: &str, value: String) {
    ui.horizontal(|ui| {
        ui.label(egui::RichText::new(label)
            .color(egui::Color32::from_rgb(130, 130, 130))
            .size(9.0));
        ui.label(egui::RichText::new(value)
            .color(egui::Color32::from_rgb(200, 200, 200))
            .size(9.0)
            .monospace());
    });
}

fn render_connection_section(ui: &mut egui::Ui, status: &SystemStatus) {
    section_label(ui, "CONN");

    // Connection status with colored indicator
    ui.horizontal(|ui| {
        let (status_color, status_text, status_icon) = match status.connection_status {
            ConnectionState::Connected => (egui::Color32::from_rgb(100, 255, 100), "CONNECTED", "●"),
            ConnectionState::Connecting => (egui::Color32::from_rgb(255, 200, 100), "CONNECTING", "◐"),
            ConnectionState::Disconnected => (egui::Color32::from_rgb(150, 150, 150), "DISCONNECTED", "○"),
            ConnectionState::Error(_) => (egui::Color32::from_rgb(255, 100, 100), "ERROR", "✕"),
        };

        ui.label(egui::RichText::new(status_icon)
            .color(status_color)
            .size(10.0));

        ui.label(egui::RichText::new(status_text)
            .color(status_color)
            .size(10.0)
            .monospace()
            .strong());
    });

    ui.label(egui::RichText::new(&status.connection_address)
        .color(egui::Color32::from_rgb(180, 180, 180))
        .size(8.0)
        .monospace());

    // Uptime (only if connected)
    if status.connection_status == ConnectionState::Connected {
        if status.connection_uptime_seconds > 0 {
            metric_row(ui, "Uptime:", format_duration(status.connection_uptime_seconds));
        }
    } else if let Some(attempt) = status.last_connection_attempt {
        metric_row(ui, "Last attempt:",
            attempt.with_timezone(&chrono::Local).format("%H:%M:%S").to_string());
    }
}

fn render_metrics_section(ui: &mut egui::Ui, status: &SystemStatus) {
    section_label(ui, "MESSAGES");

    metric_row(ui, "Node updates:", status.node_updates.to_string());
    metric_row(ui, "Rejected:", status.rejected_payloads.to_string());
    metric_row(ui, "Broker errors:", status.stomp_errors.to_string());

    if let Some(error) = &status.last_error {
        ui.label(egui::RichText::new(truncate(error, MAX_MESSAGE_CHARS))
            .color(egui::Color32::from_rgb(255, 140, 120))
            .size(8.0))
            .on_hover_text(error);
    }
}

fn render_diagnostics_section(ui: &mut egui::Ui, status: &SystemStatus) {
    section_label(ui, "DIAGNOSTICS");

    if status.diagnostics.is_empty() {
        ui.label(egui::RichText::new("No messages")
            .color(egui::Color32::from_rgb(100, 100, 100))
            .size(8.0)
            .italics());
        return;
    }

    // Each line is approximately 14 pixels tall (icon + text + spacing)
    let line_height = 14.0;
    let max_visible_lines = 8.0;

    egui::ScrollArea::vertical()
        .id_salt("diagnostics")
        .max_height(line_height * max_visible_lines)
        .auto_shrink([false, true])
        .show(ui, |ui| {
            // Newest first
            for diagnostic in status.diagnostics.iter().rev() {
                ui.horizontal(|ui| {
                    let (icon, color) = match diagnostic.level {
                        DiagnosticLevel::Info => ("ℹ", egui::Color32::from_rgb(100, 180, 255)),
                        DiagnosticLevel::Warning => ("⚠", egui::Color32::from_rgb(255, 200, 100)),
                        DiagnosticLevel::Error => ("✕", egui::Color32::from_rgb(255, 100, 100)),
                    };

                    ui.label(egui::RichText::new(icon)
                        .color(color)
                        .size(9.0));

                    let time_str = diagnostic.timestamp.format("%H:%M:%S").to_string();
                    ui.label(egui::RichText::new(time_str)
                        .color(egui::Color32::from_rgb(100, 100, 100))
                        .size(8.0)
                        .monospace());

                    ui.label(egui::RichText::new(truncate(&diagnostic.message, MAX_MESSAGE_CHARS))
                        .color(egui::Color32::from_rgb(180, 180, 180))
                        .size(8.0))
                        .on_hover_text(&diagnostic.message);
                });
            }
        });
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("node-A: INACTIVE -> RUNNING", 6), "node-A...");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
