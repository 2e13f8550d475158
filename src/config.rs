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

//! Application configuration management.
//!
//! This module handles persistent configuration storage using TOML format.
//! Every field has a serde default so older or partial config files still load.

use std::time::Duration;

use flowbase_client::store::DEFAULT_NODES;
use flowbase_client::ws::DEFAULT_BROKER_URL;
use flowbase_client::{
    ConnectionConfig, MonitorConfig, StoreConfig, UnknownNodePolicy, DEFAULT_TOPIC,
};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "flowbase-desktop";
const CONFIG_NAME: &str = "config";

/// Default base URL of the flow backend's REST endpoints
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// STOMP-over-WebSocket endpoint
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Topic carrying node state messages
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Heart-beat we want from the broker, in milliseconds (0 disables)
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,

    /// Heart-beat we send to the broker, in milliseconds (0 disables)
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,

    /// Delay before reconnecting, in milliseconds (0 disables reconnection)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Nodes shown from startup
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,

    /// What to do with updates for nodes not listed above
    #[serde(default)]
    pub unknown_nodes: UnknownNodePolicy,

    /// Base URL for the backend trigger endpoints
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Connect to the broker on startup
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_heartbeat_ms() -> u64 {
    4000
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_nodes() -> Vec<String> {
    DEFAULT_NODES.iter().map(ToString::to_string).collect()
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            broker_url: default_broker_url(),
            topic: default_topic(),
            heartbeat_incoming_ms: default_heartbeat_ms(),
            heartbeat_outgoing_ms: default_heartbeat_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            nodes: default_nodes(),
            unknown_nodes: UnknownNodePolicy::default(),
            backend_url: default_backend_url(),
            auto_connect: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Build the monitor configuration from these settings
    #[must_use]
    pub fn to_monitor_config(&self) -> MonitorConfig {
        let connection = ConnectionConfig {
            broker_url: self.broker_url.clone(),
            heartbeat_incoming: Duration::from_millis(self.heartbeat_incoming_ms),
            heartbeat_outgoing: Duration::from_millis(self.heartbeat_outgoing_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            ..ConnectionConfig::default()
        };

        let store = StoreConfig {
            initial_nodes: self.nodes.clone(),
            unknown_nodes: self.unknown_nodes,
            ..StoreConfig::default()
        };

        MonitorConfig {
            connection,
            store,
            topic: self.topic.clone(),
            ..MonitorConfig::default()
        }
    }
}
