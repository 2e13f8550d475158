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

use chrono::{DateTime, Utc};
use flowbase_client::{ConnectionState, MonitorEvent, UpdateOutcome};
use std::collections::VecDeque;

const MAX_DIAGNOSTICS: usize = 50;

/// Diagnostic message with timestamp
#[derive(Debug, Clone)]
pub struct DiagnosticMessage {
    pub timestamp: DateTime<Utc>,
    pub level: DiagnosticLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// System status tracking connection metrics and diagnostics
#[derive(Debug)]
pub struct SystemStatus {
    // Connection status
    pub connection_status: ConnectionState,
    pub connection_address: String,
    pub last_connection_attempt: Option<DateTime<Utc>>,
    pub last_successful_connection: Option<DateTime<Utc>>,
    pub connection_uptime_seconds: u64,

    // Message statistics
    pub node_updates: u64,
    pub rejected_payloads: u64,
    pub stomp_errors: u64,
    pub last_error: Option<String>,

    // Diagnostic messages (keep last 50)
    pub diagnostics: VecDeque<DiagnosticMessage>,
    max_diagnostics: usize,
}

impl SystemStatus {
    pub fn new(connection_address: impl Into<String>) -> Self {
        Self {
            connection_status: ConnectionState::Disconnected,
            connection_address: connection_address.into(),
            last_connection_attempt: None,
            last_successful_connection: None,
            connection_uptime_seconds: 0,

            node_updates: 0,
            rejected_payloads: 0,
            stomp_errors: 0,
            last_error: None,

            diagnostics: VecDeque::with_capacity(MAX_DIAGNOSTICS),
            max_diagnostics: MAX_DIAGNOSTICS,
        }
    }

    /// Fold a monitor event into the status
    pub fn apply(&mut self, event: &MonitorEvent) {
        match event {
            MonitorEvent::ConnectionChanged(state) => self.set_connection_status(state.clone()),
            MonitorEvent::Connected => {
                self.add_diagnostic(DiagnosticLevel::Info, "STOMP session established".to_string());
            }
            MonitorEvent::NodeUpdated {
                node_id,
                state,
                outcome,
            } => {
                self.node_updates += 1;
                match outcome {
                    UpdateOutcome::Added => self.add_diagnostic(
                        DiagnosticLevel::Info,
                        format!("Registered {node_id} as {state}"),
                    ),
                    UpdateOutcome::Changed { previous } => self.add_diagnostic(
                        DiagnosticLevel::Info,
                        format!("{node_id}: {previous} -> {state}"),
                    ),
                    UpdateOutcome::Unchanged | UpdateOutcome::Rejected => {}
                }
            }
            MonitorEvent::NodeRejected { node_id, state } => self.add_diagnostic(
                DiagnosticLevel::Warning,
                format!("Ignored {state} for unknown node {node_id}"),
            ),
            MonitorEvent::PayloadRejected { reason } => {
                self.rejected_payloads += 1;
                self.last_error = Some(reason.clone());
                self.add_diagnostic(
                    DiagnosticLevel::Warning,
                    format!("Dropped message: {reason}"),
                );
            }
            MonitorEvent::StompError { message, body } => {
                self.stomp_errors += 1;
                let summary = message.clone().unwrap_or_else(|| body.clone());
                self.last_error = Some(summary.clone());
                self.add_diagnostic(DiagnosticLevel::Error, format!("Broker error: {summary}"));
            }
        }
    }

    /// Update connection status
    pub fn set_connection_status(&mut self, status: ConnectionState) {
        match &status {
            ConnectionState::Connecting => {
                self.last_connection_attempt = Some(Utc::now());
                self.add_diagnostic(DiagnosticLevel::Info,
                    format!("Connecting to {}...", self.connection_address));
            }
            ConnectionState::Connected => {
                self.last_successful_connection = Some(Utc::now());
                self.add_diagnostic(DiagnosticLevel::Info,
                    format!("Connected to {}", self.connection_address));
            }
            ConnectionState::Disconnected => {
                self.connection_uptime_seconds = 0;
                if self.connection_status != ConnectionState::Disconnected {
                    self.add_diagnostic(DiagnosticLevel::Warning,
                        format!("Disconnected from {}", self.connection_address));
                }
            }
            ConnectionState::Error(error) => {
                self.connection_uptime_seconds = 0;
                self.last_error = Some(error.clone());
                self.add_diagnostic(DiagnosticLevel::Error,
                    format!("Connection error: {error}"));
            }
        }
        self.connection_status = status;
    }

    /// Add a diagnostic message
    pub fn add_diagnostic(&mut self, level: DiagnosticLevel, message: String) {
        let diagnostic = DiagnosticMessage {
            timestamp: Utc::now(),
            level,
            message,
        };

        self.diagnostics.push_back(diagnostic);

        // Keep only the last N messages
        while self.diagnostics.len() > self.max_diagnostics {
            self.diagnostics.pop_front();
        }
    }

    /// Update connection uptime
    pub fn update_uptime(&mut self) {
        if self.connection_status == ConnectionState::Connected {
            if let Some(connect_time) = self.last_successful_connection {
                self.connection_uptime_seconds =
                    u64::try_from((Utc::now() - connect_time).num_seconds()).unwrap_or(0);
            }
        }
    }
}
