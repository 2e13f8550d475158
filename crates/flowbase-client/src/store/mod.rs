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

//! Node status tracking.
//!
//! Keeps the current state of every known flow node and emits a [`NodeEvent`]
//! for each update, so hosts can react without sharing mutable state.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Node ids tracked from startup.
pub const DEFAULT_NODES: [&str; 2] = ["node-A", "node-B"];

/// Activation state of a node.
///
/// Any string is accepted; values outside the known set are kept verbatim in
/// [`NodeState::Other`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum NodeState {
    #[default]
    Inactive,
    Active,
    Running,
    Done,
    Other(String),
}

impl NodeState {
    /// Wire representation of the state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Active => "ACTIVE",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Other(other) => other,
        }
    }
}

impl FromStr for NodeState {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "INACTIVE" => Self::Inactive,
            "ACTIVE" => Self::Active,
            "RUNNING" => Self::Running,
            "DONE" => Self::Done,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<&str> for NodeState {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(NodeState::from(raw.as_str()))
    }
}

/// What to do with updates for node ids that were not configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownNodePolicy {
    /// Add the node to the map on first update.
    #[default]
    Register,
    /// Drop the update and leave the map unchanged.
    Reject,
}

/// Current state of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub state: NodeState,
    /// When the last update was applied. `None` until the first update.
    pub updated_at: Option<DateTime<Utc>>,
}

impl NodeEntry {
    fn initial() -> Self {
        Self {
            state: NodeState::Inactive,
            updated_at: None,
        }
    }
}

/// Result of applying an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The node was not known and has been registered.
    Added,
    /// The node changed state.
    Changed { previous: NodeState },
    /// The node already had this state.
    Unchanged,
    /// The node is unknown and the policy rejects it.
    Rejected,
}

/// Events emitted by the store when node state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A previously unknown node was registered.
    NodeAdded { node_id: String, state: NodeState },
    /// A node's state was set.
    StateUpdated {
        node_id: String,
        previous: NodeState,
        state: NodeState,
    },
    /// All nodes were returned to their initial state.
    Reset,
}

/// Configuration for the node status store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Node ids present from startup, all `INACTIVE`.
    pub initial_nodes: Vec<String>,
    /// Handling of updates for node ids not in `initial_nodes`.
    pub unknown_nodes: UnknownNodePolicy,
    /// Broadcast channel capacity for events.
    pub event_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_nodes: DEFAULT_NODES.iter().map(ToString::to_string).collect(),
            unknown_nodes: UnknownNodePolicy::default(),
            event_channel_capacity: 256,
        }
    }
}

/// Node status store that maintains state and emits events.
pub struct NodeStatusStore {
    nodes: BTreeMap<String, NodeEntry>,
    initial_nodes: Vec<String>,
    unknown_nodes: UnknownNodePolicy,
    event_tx: broadcast::Sender<NodeEvent>,
}

impl fmt::Debug for NodeStatusStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStatusStore")
            .field("node_count", &self.nodes.len())
            .field("unknown_nodes", &self.unknown_nodes)
            .finish_non_exhaustive()
    }
}

impl Default for NodeStatusStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl NodeStatusStore {
    /// Create a new store with the given configuration.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let nodes = config
            .initial_nodes
            .iter()
            .map(|id| (id.clone(), NodeEntry::initial()))
            .collect();

        Self {
            nodes,
            initial_nodes: config.initial_nodes,
            unknown_nodes: config.unknown_nodes,
            event_tx,
        }
    }

    /// Set the state of a node.
    ///
    /// The state string is not validated. Unknown node ids follow the
    /// configured [`UnknownNodePolicy`].
    pub fn update_state(&mut self, node_id: &str, state: NodeState) -> UpdateOutcome {
        let now = Utc::now();

        let Some(entry) = self.nodes.get_mut(node_id) else {
            if self.unknown_nodes == UnknownNodePolicy::Reject {
                warn!("Ignoring state {} for unknown node {}", state, node_id);
                return UpdateOutcome::Rejected;
            }

            info!("Node {} registered with state {}", node_id, state);
            self.nodes.insert(
                node_id.to_string(),
                NodeEntry {
                    state: state.clone(),
                    updated_at: Some(now),
                },
            );
            let _ = self.event_tx.send(NodeEvent::NodeAdded {
                node_id: node_id.to_string(),
                state,
            });
            return UpdateOutcome::Added;
        };

        entry.updated_at = Some(now);
        if entry.state == state {
            info!("Node {} state updated to {}", node_id, state);
            return UpdateOutcome::Unchanged;
        }

        let previous = std::mem::replace(&mut entry.state, state.clone());
        info!("Node {} state updated to {} (was {})", node_id, state, previous);
        let _ = self.event_tx.send(NodeEvent::StateUpdated {
            node_id: node_id.to_string(),
            previous: previous.clone(),
            state,
        });
        UpdateOutcome::Changed { previous }
    }

    /// Get a node's current entry.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<&NodeEntry> {
        self.nodes.get(node_id)
    }

    /// Get a node's current state.
    #[must_use]
    pub fn state(&self, node_id: &str) -> Option<&NodeState> {
        self.nodes.get(node_id).map(|entry| &entry.state)
    }

    /// Snapshot of all nodes, ordered by id.
    #[must_use]
    pub fn nodes(&self) -> BTreeMap<String, NodeEntry> {
        self.nodes.clone()
    }

    /// Iterate over all nodes, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeEntry)> {
        self.nodes.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Get the number of tracked nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if no nodes are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Subscribe to store events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.event_tx.subscribe()
    }

    /// Return configured nodes to `INACTIVE` and forget registered ones.
    pub fn reset(&mut self) {
        self.nodes = self
            .initial_nodes
            .iter()
            .map(|id| (id.clone(), NodeEntry::initial()))
            .collect();
        info!("Node states reset");
        let _ = self.event_tx.send(NodeEvent::Reset);
    }
}
