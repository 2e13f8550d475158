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

//! Flowbase client library for following node activation over STOMP.
//!
//! The flow backend publishes `{"nodeId": ..., "state": ...}` messages on a
//! STOMP topic whenever a node changes state. This library keeps a local map
//! of node states in sync with that topic. It is split into layers that can be
//! used independently or composed together:
//!
//! - **STOMP layer**: minimal frame codec and heart-beat negotiation
//! - **Protocol layer**: node-state payload decoding (text or UTF-8 binary bodies)
//! - **Store layer**: node state map with change events
//! - **Connection layer**: async WebSocket with STOMP handshake and automatic reconnection
//!
//! # Quick Start
//!
//! Use the [`NodeMonitor`] type for full-stack operation:
//!
//! ```no_run
//! use flowbase_client::{MonitorConfig, NodeMonitor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let monitor = NodeMonitor::new(MonitorConfig::default());
//!     let handle = monitor.connect();
//!
//!     for _ in 0..10 {
//!         for (id, entry) in monitor.nodes() {
//!             println!("{id}: {}", entry.state);
//!         }
//!         tokio::time::sleep(Duration::from_secs(1)).await;
//!     }
//!
//!     monitor.disconnect(Some(handle));
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Store Layer Only
//!
//! ```
//! use flowbase_client::store::{NodeState, NodeStatusStore};
//!
//! let mut store = NodeStatusStore::default();
//! store.update_state("node-A", NodeState::Running);
//! assert_eq!(store.state("node-A"), Some(&NodeState::Running));
//! ```

pub mod protocol;
pub mod stomp;
pub mod store;
pub mod ws;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::time::timeout;

pub use protocol::{decode_payload, NodeStateMessage, NodeStateParser, ParseError, Protocol};
pub use stomp::{Body, Command, Frame, FrameError, HeartBeat};
pub use store::{
    NodeEntry, NodeEvent, NodeState, NodeStatusStore, StoreConfig, UnknownNodePolicy,
    UpdateOutcome,
};
pub use ws::{
    Connection, ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionHandle,
    ConnectionState,
};

/// Topic the backend publishes node state changes on.
pub const DEFAULT_TOPIC: &str = "/topic/node-activated";

/// Application destination that asks the backend to activate node A.
pub const TRIGGER_NODE_A_DESTINATION: &str = "/app/trigger/nodeA";

/// Configuration for the full-stack monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Connection configuration.
    pub connection: ConnectionConfig,
    /// Store configuration.
    pub store: StoreConfig,
    /// Topic carrying node state messages.
    pub topic: String,
    /// Broadcast channel capacity for monitor events.
    pub event_channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            store: StoreConfig::default(),
            topic: DEFAULT_TOPIC.to_string(),
            event_channel_capacity: 256,
        }
    }
}

/// Counters describing traffic seen by the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// MESSAGE frames received on the topic.
    pub messages_received: u64,
    /// Messages dropped because the payload could not be decoded.
    pub messages_rejected: u64,
    /// ERROR frames received from the broker.
    pub stomp_errors: u64,
    /// When the last MESSAGE frame arrived.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Most recent payload or broker error.
    pub last_error: Option<String>,
}

/// Events emitted by the monitor for hosts that render connection activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Connection state changed.
    ConnectionChanged(ConnectionState),
    /// STOMP session established and subscription requested.
    Connected,
    /// A node update was applied to the store.
    NodeUpdated {
        node_id: String,
        state: NodeState,
        outcome: UpdateOutcome,
    },
    /// An update for an unknown node was refused by [`UnknownNodePolicy::Reject`].
    NodeRejected { node_id: String, state: NodeState },
    /// A message was dropped because its payload was invalid.
    PayloadRejected { reason: String },
    /// The broker sent an ERROR frame.
    StompError {
        message: Option<String>,
        body: String,
    },
}

/// Full-stack node monitor that wires all layers together.
///
/// The monitor owns the node store. Each call to [`NodeMonitor::connect`]
/// returns a [`ConnectionHandle`] owned by the caller; pass it back to
/// [`NodeMonitor::disconnect`] to close the connection.
#[derive(Clone)]
pub struct NodeMonitor {
    config: MonitorConfig,
    store: Arc<RwLock<NodeStatusStore>>,
    stats: Arc<RwLock<MonitorStats>>,
    connection_state: Arc<RwLock<ConnectionState>>,
    /// Id of the connection whose state changes are tracked.
    active_connection: Arc<AtomicU64>,
    event_tx: broadcast::Sender<MonitorEvent>,
}

impl std::fmt::Debug for NodeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMonitor")
            .field("broker_url", &self.config.connection.broker_url)
            .field("topic", &self.config.topic)
            .finish_non_exhaustive()
    }
}

impl NodeMonitor {
    /// Create a monitor with every configured node `INACTIVE`.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        let store = NodeStatusStore::new(config.store.clone());
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        Self {
            config,
            store: Arc::new(RwLock::new(store)),
            stats: Arc::new(RwLock::new(MonitorStats::default())),
            connection_state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            active_connection: Arc::new(AtomicU64::new(0)),
            event_tx,
        }
    }

    /// Open a broker connection and subscribe to the node topic.
    ///
    /// Activation is asynchronous: success and failure are reported through
    /// [`MonitorEvent`]s and [`NodeMonitor::connection_state`], not through a
    /// return value. Must be called from within a tokio runtime.
    ///
    /// Only the most recent connection drives [`NodeMonitor::connection_state`];
    /// late state changes from an earlier one are ignored.
    #[must_use]
    pub fn connect(&self) -> ConnectionHandle {
        let connection_id = self.begin_connection();
        let connection =
            Connection::spawn(self.config.connection.clone(), vec![self.config.topic.clone()]);
        let (handle, mut events) = connection.into_parts();

        let monitor = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                monitor.apply_connection_event(connection_id, event);
            }
            debug!("Connection {} event stream ended", connection_id);
        });

        handle
    }

    /// Close a connection returned by [`NodeMonitor::connect`].
    ///
    /// Passing `None` is a no-op. Shutdown finishes in the background; use
    /// [`NodeMonitor::disconnect_gracefully`] to wait for it.
    pub fn disconnect(&self, handle: Option<ConnectionHandle>) {
        match handle {
            Some(handle) => {
                handle.shutdown();
                info!("Disconnected from {}", handle.broker_url());
            }
            None => debug!("Disconnect requested with no active connection"),
        }
    }

    /// Close a connection and wait up to `grace` for DISCONNECT to be sent.
    ///
    /// Returns false if the session was still running when `grace` ran out.
    pub async fn disconnect_gracefully(
        &self,
        handle: Option<ConnectionHandle>,
        grace: Duration,
    ) -> bool {
        let Some(handle) = handle else {
            self.disconnect(None);
            return true;
        };

        let mut state = handle.watch_state();
        let broker_url = handle.broker_url().to_string();
        self.disconnect(Some(handle));

        // A closed channel means the session task has already finished.
        let finished = timeout(
            grace,
            state.wait_for(|current| *current == ConnectionState::Disconnected),
        )
        .await
        .is_ok();

        if !finished {
            warn!(
                "Connection to {} still closing after {} ms",
                broker_url,
                grace.as_millis()
            );
        }
        finished
    }

    /// Set a node's state.
    ///
    /// The state is not validated; unknown nodes follow the configured
    /// [`UnknownNodePolicy`].
    pub fn update_node_state(&self, node_id: &str, state: &str) -> UpdateOutcome {
        let state = NodeState::from(state);
        let outcome = self
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .update_state(node_id, state.clone());

        let event = if outcome == UpdateOutcome::Rejected {
            MonitorEvent::NodeRejected {
                node_id: node_id.to_string(),
                state,
            }
        } else {
            MonitorEvent::NodeUpdated {
                node_id: node_id.to_string(),
                state,
                outcome: outcome.clone(),
            }
        };
        let _ = self.event_tx.send(event);
        outcome
    }

    fn begin_connection(&self) -> u64 {
        self.active_connection.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply an event from connection `connection_id`, dropping state changes
    /// from connections that have since been replaced.
    fn apply_connection_event(&self, connection_id: u64, event: ConnectionEvent) {
        if let ConnectionEvent::StateChanged(state) = &event {
            let active = self.active_connection.load(Ordering::SeqCst);
            if connection_id != active {
                debug!(
                    "Ignoring {:?} from connection {} (active: {})",
                    state, connection_id, active
                );
                return;
            }
        }
        self.process_event(event);
    }

    /// Apply one event from the connection.
    pub fn process_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                *self
                    .connection_state
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = state.clone();
                let _ = self.event_tx.send(MonitorEvent::ConnectionChanged(state));
            }
            ConnectionEvent::Connected(frame) => {
                info!(
                    "Connected to WebSocket (server: {})",
                    frame.get_header("server").unwrap_or("unknown")
                );
                let _ = self.event_tx.send(MonitorEvent::Connected);
            }
            ConnectionEvent::Message(frame) => {
                self.handle_message(&frame);
            }
            ConnectionEvent::StompError { message, body } => {
                error!("STOMP error {}", message.as_deref().unwrap_or("(no message)"));
                error!("Additional details {}", body);
                self.record(|stats| {
                    stats.stomp_errors += 1;
                    stats.last_error = Some(message.clone().unwrap_or_else(|| body.clone()));
                });
                let _ = self.event_tx.send(MonitorEvent::StompError { message, body });
            }
        }
    }

    /// Decode a MESSAGE frame and apply it to the store.
    ///
    /// Returns `None` if the payload was rejected; the store is unchanged and
    /// the failure is logged and counted.
    pub fn handle_message(&self, frame: &Frame) -> Option<UpdateOutcome> {
        self.record(|stats| {
            stats.messages_received += 1;
            stats.last_message_at = Some(Utc::now());
        });

        if let Some(destination) = frame.destination() {
            if destination != self.config.topic {
                debug!("Message for unexpected destination {}", destination);
            }
        }

        match decode_payload(frame) {
            Ok(NodeStateMessage { node_id, state }) => {
                debug!("Applying update for {}: {}", node_id, state);
                Some(self.update_node_state(&node_id, &state))
            }
            Err(e) => {
                warn!("Dropping node state message: {}", e);
                let reason = e.to_string();
                self.record(|stats| {
                    stats.messages_rejected += 1;
                    stats.last_error = Some(reason.clone());
                });
                let _ = self.event_tx.send(MonitorEvent::PayloadRejected { reason });
                None
            }
        }
    }

    /// Snapshot of all nodes, ordered by id.
    #[must_use]
    pub fn nodes(&self) -> BTreeMap<String, NodeEntry> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .nodes()
    }

    /// Current state of one node.
    #[must_use]
    pub fn node_state(&self, node_id: &str) -> Option<NodeState> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state(node_id)
            .cloned()
    }

    /// Return all nodes to their initial state.
    pub fn reset_nodes(&self) {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    /// Subscribe to node store events.
    #[must_use]
    pub fn subscribe_nodes(&self) -> broadcast::Receiver<NodeEvent> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe()
    }

    /// Subscribe to monitor events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    /// Traffic counters.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// State of the most recent connection.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Monitor configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn record(&self, update: impl FnOnce(&mut MonitorStats)) {
        update(&mut self.stats.write().unwrap_or_else(PoisonError::into_inner));
    }
}

#[cfg(test)]
mod tests {
    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::ws::loopback::{accept_stomp, await_disconnect, next_frame, send_text, CONNECTED};

    fn message_frame(body: Body) -> Frame {
        Frame::new(Command::Message)
            .header("destination", DEFAULT_TOPIC)
            .header("subscription", "sub-0")
            .with_body(body)
    }

    #[test]
    fn test_update_node_state_sets_only_that_key() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        monitor.update_node_state("node-B", "RUNNING");

        let nodes = monitor.nodes();
        assert_eq!(nodes["node-B"].state, NodeState::Running);
        assert_eq!(nodes["node-A"].state, NodeState::Inactive);
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_message_updates_node() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        let frame = message_frame(Body::Text(
            r#"{"nodeId":"node-A","state":"ACTIVE"}"#.to_string(),
        ));

        let outcome = monitor.handle_message(&frame);
        assert_eq!(
            outcome,
            Some(UpdateOutcome::Changed {
                previous: NodeState::Inactive
            })
        );
        assert_eq!(monitor.node_state("node-A"), Some(NodeState::Active));
        assert_eq!(monitor.stats().messages_received, 1);
    }

    #[test]
    fn test_malformed_message_leaves_map_unchanged() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        let mut events = monitor.subscribe_events();
        let before = monitor.nodes();

        let outcome = monitor.handle_message(&message_frame(Body::Text("{nodeId:".to_string())));

        assert_eq!(outcome, None);
        assert_eq!(monitor.nodes(), before);
        assert_eq!(monitor.stats().messages_rejected, 1);
        assert!(matches!(
            events.try_recv(),
            Ok(MonitorEvent::PayloadRejected { .. })
        ));
    }

    #[test]
    fn test_binary_message_matches_text_message() {
        let json = r#"{"nodeId":"node-B","state":"DONE"}"#;

        let text_monitor = NodeMonitor::new(MonitorConfig::default());
        text_monitor.handle_message(&message_frame(Body::Text(json.to_string())));

        let binary_monitor = NodeMonitor::new(MonitorConfig::default());
        binary_monitor.handle_message(&message_frame(Body::Binary(json.as_bytes().to_vec())));

        assert_eq!(binary_monitor.node_state("node-B"), Some(NodeState::Done));
        assert_eq!(
            text_monitor.node_state("node-B"),
            binary_monitor.node_state("node-B")
        );
    }

    #[test]
    fn test_disconnect_without_connection_is_noop() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        monitor.disconnect(None);
        assert_eq!(monitor.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_unseen_node_is_added() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        assert_eq!(
            monitor.update_node_state("node-C", "ACTIVE"),
            UpdateOutcome::Added
        );
        assert_eq!(monitor.nodes().len(), 3);
    }

    #[test]
    fn test_stomp_error_is_recorded() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        monitor.process_event(ConnectionEvent::StompError {
            message: Some("Access denied".to_string()),
            body: "details".to_string(),
        });

        let stats = monitor.stats();
        assert_eq!(stats.stomp_errors, 1);
        assert_eq!(stats.last_error.as_deref(), Some("Access denied"));
    }

    #[test]
    fn test_state_changes_are_tracked() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        monitor.process_event(ConnectionEvent::StateChanged(ConnectionState::Connecting));
        assert_eq!(monitor.connection_state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_end_to_end_over_loopback_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut ws, connect) = accept_stomp(&listener).await;
            assert_eq!(connect.get_header("accept-version"), Some("1.2,1.1,1.0"));
            send_text(&mut ws, CONNECTED).await;

            let subscribe = next_frame(&mut ws).await.unwrap();
            assert_eq!(subscribe.command, Command::Subscribe);
            assert_eq!(subscribe.destination(), Some(DEFAULT_TOPIC));

            ws.send(Message::text(
                "MESSAGE\ndestination:/topic/node-activated\nsubscription:sub-0\nmessage-id:1\n\n{\"nodeId\":\"node-A\",\"state\":\"RUNNING\"}\0",
            ))
            .await
            .unwrap();
            ws.send(Message::binary(
                b"MESSAGE\ndestination:/topic/node-activated\nsubscription:sub-0\nmessage-id:2\n\n{\"nodeId\":\"node-B\",\"state\":\"DONE\"}\0".to_vec(),
            ))
            .await
            .unwrap();
            ws.send(Message::text(
                "MESSAGE\ndestination:/topic/node-activated\nsubscription:sub-0\nmessage-id:3\n\nnot json\0",
            ))
            .await
            .unwrap();

            let send = next_frame(&mut ws).await.unwrap();
            assert_eq!(send.command, Command::Send);
            assert_eq!(send.destination(), Some(TRIGGER_NODE_A_DESTINATION));

            await_disconnect(&mut ws).await;
        });

        let monitor = NodeMonitor::new(MonitorConfig {
            connection: ConnectionConfig {
                broker_url: format!("ws://{addr}/ws"),
                reconnect_delay: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        });
        let mut events = monitor.subscribe_events();
        let handle = monitor.connect();

        timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(MonitorEvent::PayloadRejected { .. }) = events.recv().await {
                    break;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(monitor.node_state("node-A"), Some(NodeState::Running));
        assert_eq!(monitor.node_state("node-B"), Some(NodeState::Done));
        assert_eq!(monitor.stats().messages_received, 3);
        assert_eq!(monitor.stats().messages_rejected, 1);
        assert_eq!(monitor.connection_state(), ConnectionState::Connected);

        // Queued SENDs are flushed ahead of DISCONNECT.
        handle.send(TRIGGER_NODE_A_DESTINATION, "").unwrap();
        assert!(
            monitor
                .disconnect_gracefully(Some(handle), Duration::from_secs(5))
                .await
        );
        timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
        assert_eq!(monitor.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_graceful_disconnect_without_connection() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        assert!(monitor.disconnect_gracefully(None, Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_graceful_disconnect_during_upgrade() {
        // Accept the TCP connection but never answer the upgrade.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stalled = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let monitor = NodeMonitor::new(MonitorConfig {
            connection: ConnectionConfig {
                broker_url: format!("ws://{addr}/ws"),
                reconnect_delay: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        });
        let handle = monitor.connect();
        let mut state = handle.watch_state();
        timeout(
            Duration::from_secs(5),
            state.wait_for(|current| *current == ConnectionState::Connecting),
        )
        .await
        .unwrap()
        .unwrap();

        // Shutdown must not wait on the stalled upgrade.
        assert!(
            monitor
                .disconnect_gracefully(Some(handle), Duration::from_secs(5))
                .await
        );
        stalled.abort();
    }

    #[test]
    fn test_rejected_update_is_not_reported_as_applied() {
        let monitor = NodeMonitor::new(MonitorConfig {
            store: StoreConfig {
                unknown_nodes: UnknownNodePolicy::Reject,
                ..StoreConfig::default()
            },
            ..Default::default()
        });
        let mut events = monitor.subscribe_events();

        assert_eq!(
            monitor.update_node_state("node-Z", "ACTIVE"),
            UpdateOutcome::Rejected
        );
        assert_eq!(
            events.try_recv(),
            Ok(MonitorEvent::NodeRejected {
                node_id: "node-Z".to_string(),
                state: NodeState::Active,
            })
        );
        assert!(events.try_recv().is_err());
        assert_eq!(monitor.node_state("node-Z"), None);
    }

    #[test]
    fn test_stale_connection_state_is_ignored() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        let mut events = monitor.subscribe_events();
        let first = monitor.begin_connection();
        let second = monitor.begin_connection();

        monitor.apply_connection_event(
            second,
            ConnectionEvent::StateChanged(ConnectionState::Connected),
        );
        // The replaced connection finishes shutting down after the new one is up.
        monitor.apply_connection_event(
            first,
            ConnectionEvent::StateChanged(ConnectionState::Disconnected),
        );

        assert_eq!(monitor.connection_state(), ConnectionState::Connected);
        assert_eq!(
            events.try_recv(),
            Ok(MonitorEvent::ConnectionChanged(ConnectionState::Connected))
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_stale_connection_still_delivers_messages() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        let first = monitor.begin_connection();
        monitor.begin_connection();

        monitor.apply_connection_event(
            first,
            ConnectionEvent::Message(message_frame(Body::Text(
                r#"{"nodeId":"node-A","state":"DONE"}"#.to_string(),
            ))),
        );
        assert_eq!(monitor.node_state("node-A"), Some(NodeState::Done));
    }
}
