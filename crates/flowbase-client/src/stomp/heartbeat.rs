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

//! STOMP `heart-beat` header handling.

use std::time::Duration;

/// Heart-beat intervals advertised by one side of a connection.
///
/// A zero interval means that side cannot send (or does not want to receive)
/// heart-beats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartBeat {
    /// Smallest interval at which this side can send heart-beats.
    pub outgoing: Duration,
    /// Desired interval at which this side wants to receive heart-beats.
    pub incoming: Duration,
}

impl HeartBeat {
    #[must_use]
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    /// Parse a `cx,cy` header value in milliseconds.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (outgoing, incoming) = value.split_once(',')?;
        let outgoing = outgoing.trim().parse::<u64>().ok()?;
        let incoming = incoming.trim().parse::<u64>().ok()?;
        Some(Self::new(
            Duration::from_millis(outgoing),
            Duration::from_millis(incoming),
        ))
    }

    /// Header value in `cx,cy` form.
    #[must_use]
    pub fn to_header(&self) -> String {
        format!("{},{}", self.outgoing.as_millis(), self.incoming.as_millis())
    }

    /// Negotiate against the server's advertised values.
    ///
    /// Returns `(send_every, expect_within)`. `None` disables that direction.
    #[must_use]
    pub fn negotiate(&self, server: HeartBeat) -> (Option<Duration>, Option<Duration>) {
        let send = if self.outgoing.is_zero() || server.incoming.is_zero() {
            None
        } else {
            Some(self.outgoing.max(server.incoming))
        };
        let receive = if self.incoming.is_zero() || server.outgoing.is_zero() {
            None
        } else {
            Some(self.incoming.max(server.outgoing))
        };
        (send, receive)
    }
}
