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

//! Desktop dashboard hosting the node monitor.

use std::collections::HashMap;
use std::time::Duration;

use flowbase_client::{
    ConnectionHandle, MonitorEvent, NodeMonitor, NodeState, TRIGGER_NODE_A_DESTINATION,
};
use log::{error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};

use crate::backend::{BackendClient, Trigger};
use crate::status::{DiagnosticLevel, SystemStatus};
use crate::status_pane::StatusPane;

const REPAINT_INTERVAL: Duration = Duration::from_millis(250);

/// Result of a backend request, delivered back to the UI thread
#[derive(Debug)]
enum BackendReply {
    Triggered(Trigger, Result<String, String>),
    Status(Result<HashMap<String, bool>, String>),
}

pub struct FlowbaseApp {
    monitor: NodeMonitor,
    connection: Option<ConnectionHandle>,
    events: broadcast::Receiver<MonitorEvent>,
    status: SystemStatus,
    status_pane: StatusPane,
    runtime: Handle,
    backend: Option<BackendClient>,
    backend_tx: mpsc::UnboundedSender<BackendReply>,
    backend_rx: mpsc::UnboundedReceiver<BackendReply>,
    backend_status: Option<HashMap<String, bool>>,
    last_backend_reply: Option<String>,
}

impl std::fmt::Debug for FlowbaseApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowbaseApp")
            .field("monitor", &self.monitor)
            .field("connected", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl FlowbaseApp {
    /// Create the app. Must be called with `runtime` entered.
    pub fn new(monitor: NodeMonitor, runtime: Handle, backend_url: &str, auto_connect: bool) -> Self {
        let events = monitor.subscribe_events();
        let status = SystemStatus::new(monitor.config().connection.broker_url.clone());
        let (backend_tx, backend_rx) = mpsc::unbounded_channel();

        let backend = match BackendClient::new(backend_url) {
            Ok(client) => Some(client),
            Err(e) => {
                error!("Failed to create backend client: {}", e);
                None
            }
        };

        let mut app = Self {
            monitor,
            connection: None,
            events,
            status,
            status_pane: StatusPane::new(),
            runtime,
            backend,
            backend_tx,
            backend_rx,
            backend_status: None,
            last_backend_reply: None,
        };

        if auto_connect {
            app.connect();
        }
        app
    }

    fn connect(&mut self) {
        if self.connection.is_none() {
            self.connection = Some(self.monitor.connect());
        }
    }

    fn disconnect(&mut self) {
        self.monitor.disconnect(self.connection.take());
    }

    fn send_stomp_trigger(&mut self) {
        let Some(handle) = &self.connection else {
            return;
        };
        match handle.send(TRIGGER_NODE_A_DESTINATION, "") {
            Ok(()) => {
                info!("Sent trigger to {}", TRIGGER_NODE_A_DESTINATION);
                self.status.add_diagnostic(DiagnosticLevel::Info,
                    format!("SEND {TRIGGER_NODE_A_DESTINATION}"));
            }
            Err(e) => {
                warn!("Failed to send trigger: {}", e);
                self.status.add_diagnostic(DiagnosticLevel::Error,
                    format!("Trigger failed: {e}"));
            }
        }
    }

    fn spawn_trigger(&self, ctx: &egui::Context, trigger: Trigger) {
        let Some(client) = self.backend.clone() else {
            return;
        };
        let tx = self.backend_tx.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            let result = client.trigger(trigger).await.map_err(|e| e.to_string());
            let _ = tx.send(BackendReply::Triggered(trigger, result));
            ctx.request_repaint();
        });
    }

    fn spawn_status_refresh(&self, ctx: &egui::Context) {
        let Some(client) = self.backend.clone() else {
            return;
        };
        let tx = self.backend_tx.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            let result = client.fetch_node_status().await.map_err(|e| e.to_string());
            let _ = tx.send(BackendReply::Status(result));
            ctx.request_repaint();
        });
    }

    /// Pull pending monitor events and backend replies into UI state
    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.status.apply(&event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("UI fell behind, skipped {} monitor events", skipped);
                    self.status.add_diagnostic(DiagnosticLevel::Warning,
                        format!("Skipped {skipped} events"));
                }
                Err(_) => break,
            }
        }

        while let Ok(reply) = self.backend_rx.try_recv() {
            match reply {
                BackendReply::Triggered(trigger, Ok(text)) => {
                    info!("{}: {}", trigger.path(), text);
                    self.last_backend_reply = Some(text);
                }
                BackendReply::Triggered(trigger, Err(e)) => {
                    warn!("{} failed: {}", trigger.path(), e);
                    self.status.add_diagnostic(DiagnosticLevel::Error,
                        format!("{} failed: {e}", trigger.path()));
                }
                BackendReply::Status(Ok(status)) => self.backend_status = Some(status),
                BackendReply::Status(Err(e)) => {
                    warn!("Node status request failed: {}", e);
                    self.status.add_diagnostic(DiagnosticLevel::Error,
                        format!("Node status failed: {e}"));
                }
            }
        }

        self.status.update_uptime();
    }

    fn render_toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("Flowbase");
            ui.separator();

            let connected = self.connection.is_some();
            if ui.add_enabled(!connected, egui::Button::new("Connect")).clicked() {
                self.connect();
            }
            if ui.add_enabled(connected, egui::Button::new("Disconnect")).clicked() {
                self.disconnect();
            }

            ui.separator();
            ui.label(egui::RichText::new(self.monitor.config().topic.as_str())
                .monospace()
                .color(egui::Color32::from_rgb(150, 150, 150)));
        });
    }

    fn render_nodes(&self, ui: &mut egui::Ui) {
        ui.label(egui::RichText::new("NODES")
            .color(egui::Color32::from_rgb(150, 150, 150))
            .size(10.0)
            .strong());
        ui.add_space(4.0);

        egui::Grid::new("nodes")
            .num_columns(3)
            .spacing([24.0, 8.0])
            .striped(true)
            .show(ui, |ui| {
                for (node_id, entry) in self.monitor.nodes() {
                    ui.label(egui::RichText::new(&node_id).monospace().size(14.0));

                    ui.label(egui::RichText::new(format!(" {} ", entry.state))
                        .color(egui::Color32::BLACK)
                        .background_color(state_color(&entry.state))
                        .monospace()
                        .strong());

                    let updated = entry.updated_at.map_or_else(
                        || "never".to_string(),
                        |at| at.with_timezone(&chrono::Local).format("%H:%M:%S").to_string(),
                    );
                    ui.label(egui::RichText::new(updated)
                        .color(egui::Color32::from_rgb(130, 130, 130))
                        .size(10.0));
                    ui.end_row();
                }
            });
    }

    fn render_controls(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.label(egui::RichText::new("CONTROLS")
            .color(egui::Color32::from_rgb(150, 150, 150))
            .size(10.0)
            .strong());
        ui.add_space(4.0);

        ui.horizontal(|ui| {
            let stomp_ready = self.connection.is_some();
            if ui.add_enabled(stomp_ready, egui::Button::new("Send STOMP trigger"))
                .on_hover_text(TRIGGER_NODE_A_DESTINATION)
                .clicked() {
                self.send_stomp_trigger();
            }
            if ui.button("Reset view").clicked() {
                self.monitor.reset_nodes();
            }
        });

        ui.add_enabled_ui(self.backend.is_some(), |ui| {
            ui.horizontal(|ui| {
                for trigger in [Trigger::NodeA, Trigger::ActivateNodeA, Trigger::NodeB] {
                    if ui.button(trigger.label()).on_hover_text(trigger.path()).clicked() {
                        self.spawn_trigger(ctx, trigger);
                    }
                }
                if ui.button("Refresh backend status").clicked() {
                    self.spawn_status_refresh(ctx);
                }
            });
        });

        if let Some(reply) = &self.last_backend_reply {
            ui.label(egui::RichText::new(reply)
                .color(egui::Color32::from_rgb(180, 180, 180))
                .italics());
        }

        if let Some(status) = &self.backend_status {
            let mut entries: Vec<_> = status.iter().collect();
            entries.sort();
            ui.horizontal(|ui| {
                ui.label("Backend:");
                for (node, active) in entries {
                    let icon = if *active { "●" } else { "○" };
                    ui.label(egui::RichText::new(format!("{icon} {node}")).monospace());
                }
            });
        }
    }
}

/// Badge color for a node state
pub fn state_color(state: &NodeState) -> egui::Color32 {
    match state {
        NodeState::Inactive => egui::Color32::from_rgb(150, 150, 150),
        NodeState::Active => egui::Color32::from_rgb(100, 180, 255),
        NodeState::Running => egui::Color32::from_rgb(255, 200, 100),
        NodeState::Done => egui::Color32::from_rgb(100, 255, 100),
        NodeState::Other(_) => egui::Color32::from_rgb(200, 150, 255),
    }
}

impl eframe::App for FlowbaseApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();
        ctx.request_repaint_after(REPAINT_INTERVAL);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.render_toolbar(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_nodes(ui);
            ui.add_space(16.0);
            ui.separator();
            self.render_controls(ui, ctx);
        });

        self.status_pane.render(ctx, &self.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_colors_are_distinct() {
        let states = [
            NodeState::Inactive,
            NodeState::Active,
            NodeState::Running,
            NodeState::Done,
            NodeState::from("PAUSED"),
        ];
        for (i, a) in states.iter().enumerate() {
            for b in &states[i + 1..] {
                assert_ne!(state_color(a), state_color(b));
            }
        }
    }
}
