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

//! Payload layer for node-state messages.
//!
//! Turns the body of a STOMP MESSAGE frame into a [`NodeStateMessage`]. The
//! body is taken as text when the frame arrived as text, otherwise the binary
//! body is decoded as UTF-8 first.

mod node_state;

pub use node_state::{decode_payload, NodeStateParser};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while decoding a payload.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("invalid node state payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("empty payload")]
    EmptyPayload,
}

/// A node activation update as published on the node topic.
///
/// ```json
/// { "nodeId": "node-A", "state": "RUNNING" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStateMessage {
    pub node_id: String,
    pub state: String,
}

impl NodeStateMessage {
    #[must_use]
    pub fn new(node_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            state: state.into(),
        }
    }
}

/// Trait for payload parsers.
///
/// Implement this trait to accept other payload encodings on the same topic.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse input bytes into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}
