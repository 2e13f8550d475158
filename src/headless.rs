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

//! Windowless mode: log the node map on every change until Ctrl-C.

use std::collections::BTreeMap;
use std::time::Duration;

use flowbase_client::{ConnectionState, MonitorEvent, NodeEntry, NodeEvent, NodeMonitor};
use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;

/// How long to wait for DISCONNECT to reach the broker on Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub async fn run(monitor: NodeMonitor, auto_connect: bool) {
    let mut nodes = monitor.subscribe_nodes();
    let mut events = monitor.subscribe_events();

    let handle = if auto_connect {
        Some(monitor.connect())
    } else {
        warn!("Not connecting; node states will not change");
        None
    };

    info!("Nodes: {}", summary(&monitor.nodes()));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
            event = nodes.recv() => match event {
                Ok(NodeEvent::Reset) => info!("Nodes reset: {}", summary(&monitor.nodes())),
                Ok(_) => info!("Nodes: {}", summary(&monitor.nodes())),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} node events", skipped),
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(MonitorEvent::ConnectionChanged(ConnectionState::Error(e))) => {
                    warn!("Connection error: {}", e);
                }
                Ok(MonitorEvent::ConnectionChanged(state)) => info!("Connection {:?}", state),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} monitor events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if !monitor.disconnect_gracefully(handle, SHUTDOWN_GRACE).await {
        warn!("Broker did not see a clean DISCONNECT");
    }
}

/// One-line rendering of the node map, e.g. `node-A=RUNNING node-B=INACTIVE`
pub fn summary(nodes: &BTreeMap<String, NodeEntry>) -> String {
    nodes
        .iter()
        .map(|(id, entry)| format!("{id}={}", entry.state))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbase_client::MonitorConfig;

    #[test]
    fn test_summary_is_sorted_by_node() {
        let monitor = NodeMonitor::new(MonitorConfig::default());
        monitor.update_node_state("node-B", "DONE");
        monitor.update_node_state("node-A", "RUNNING");

        assert_eq!(summary(&monitor.nodes()), "node-A=RUNNING node-B=DONE");
    }

    #[test]
    fn test_summary_of_empty_map() {
        assert_eq!(summary(&BTreeMap::new()), "");
    }
}
