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

//! JSON node-state parser.

use super::{NodeStateMessage, ParseError, Protocol};
use crate::stomp::Frame;

/// Parser for `{"nodeId": ..., "state": ...}` payloads.
#[derive(Debug, Default)]
pub struct NodeStateParser;

impl NodeStateParser {
    /// Create a new node-state parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for NodeStateParser {
    type Message = NodeStateMessage;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Option<NodeStateMessage>, ParseError> {
        let text = std::str::from_utf8(input)?;
        parse_payload(text).map(Some)
    }
}

/// Decode the payload of a MESSAGE frame.
///
/// A textual body is parsed as is; a binary-only body is decoded as UTF-8
/// first, so both encodings of the same JSON give the same message.
pub fn decode_payload(frame: &Frame) -> Result<NodeStateMessage, ParseError> {
    let text = frame.body.to_text()?;
    parse_payload(&text)
}

fn parse_payload(text: &str) -> Result<NodeStateMessage, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::EmptyPayload);
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomp::{Body, Command};

    fn message(body: Body) -> Frame {
        Frame::new(Command::Message)
            .header("destination", "/topic/node-activated")
            .with_body(body)
    }

    #[test]
    fn test_parse_text_body() {
        let frame = message(Body::Text(
            r#"{"nodeId":"node-A","state":"ACTIVE"}"#.to_string(),
        ));
        let msg = decode_payload(&frame).unwrap();
        assert_eq!(msg, NodeStateMessage::new("node-A", "ACTIVE"));
    }

    #[test]
    fn test_binary_body_matches_text_body() {
        let json = r#"{"nodeId":"node-B","state":"RUNNING"}"#;
        let text = decode_payload(&message(Body::Text(json.to_string()))).unwrap();
        let binary = decode_payload(&message(Body::Binary(json.as_bytes().to_vec()))).unwrap();
        assert_eq!(text, binary);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let mut parser = NodeStateParser::new();
        let msg = parser
            .parse(br#"{"nodeId":"node-A","state":"DONE","at":12}"#)
            .unwrap();
        assert_eq!(msg, Some(NodeStateMessage::new("node-A", "DONE")));
    }

    #[test]
    fn test_parse_errors() {
        let mut parser = NodeStateParser::new();

        assert!(matches!(
            parser.parse(b"{not json"),
            Err(ParseError::InvalidJson(_))
        ));
        assert!(matches!(
            parser.parse(br#"{"nodeId":"node-A"}"#),
            Err(ParseError::InvalidJson(_))
        ));
        assert!(matches!(parser.parse(b"  "), Err(ParseError::EmptyPayload)));
        assert!(matches!(
            decode_payload(&message(Body::Binary(vec![0xc3, 0x28]))),
            Err(ParseError::InvalidUtf8(_))
        ));
    }
}
