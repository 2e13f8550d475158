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

//! HTTP client for the flow backend's trigger endpoints.
//!
//! Triggers only start work on the backend; the resulting state changes
//! arrive over the STOMP topic like any other update.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend action exposed as a `GET` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Activate node A after the backend's built-in delay
    NodeA,
    /// Activate node A immediately
    ActivateNodeA,
    /// Start the node B activation check
    NodeB,
}

impl Trigger {
    pub fn path(self) -> &'static str {
        match self {
            Trigger::NodeA => "/trigger/nodeA",
            Trigger::ActivateNodeA => "/activate/nodeA",
            Trigger::NodeB => "/trigger/nodeB",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Trigger::NodeA => "Trigger node A",
            Trigger::ActivateNodeA => "Activate node A now",
            Trigger::NodeB => "Trigger node B",
        }
    }
}

/// Async client for the backend REST API
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fire a trigger and return the backend's acknowledgement text
    pub async fn trigger(&self, trigger: Trigger) -> Result<String, reqwest::Error> {
        let url = self.url(trigger.path());
        debug!("GET {}", url);
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Fetch the backend's own view of which nodes are active
    pub async fn fetch_node_status(&self) -> Result<HashMap<String, bool>, reqwest::Error> {
        let url = self.url("/node-status");
        debug!("GET {}", url);
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}
