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

//! Minimal STOMP 1.2 frame codec.
//!
//! Covers what a single subscribing client needs: CONNECT, SUBSCRIBE, SEND and
//! DISCONNECT going out; CONNECTED, MESSAGE, RECEIPT and ERROR coming in; and
//! bare end-of-line heart-beats in both directions. Transactions and explicit
//! acknowledgement modes are not supported.
//!
//! Wire format:
//! ```text
//! COMMAND
//! header1:value1
//! header2:value2
//!
//! body^@
//! ```

mod heartbeat;

pub use heartbeat::HeartBeat;

use std::borrow::Cow;
use std::fmt;
use std::str::Utf8Error;

use thiserror::Error;

/// Errors produced while decoding a STOMP frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not terminated")]
    Unterminated,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),
}

/// STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Wire representation of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a command line.
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let command = match line {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    // CONNECT and CONNECTED carry raw header values for 1.0 compatibility.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame body.
///
/// Frames that arrive in WebSocket text messages carry a textual body; frames
/// that arrive in binary messages keep their raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Binary(Vec<u8>),
}

impl Default for Body {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl Body {
    /// Raw body bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Whether the body has no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Textual body, if the frame arrived as text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Body as text, decoding a binary body as UTF-8.
    pub fn to_text(&self) -> Result<Cow<'_, str>, Utf8Error> {
        match self {
            Self::Text(text) => Ok(Cow::Borrowed(text)),
            Self::Binary(bytes) => std::str::from_utf8(bytes).map(Cow::Borrowed),
        }
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Repeated headers are kept; lookups use the first.
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Frame {
    /// Create an empty frame for the given command.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Body::default(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Look up a header value.
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The `destination` header.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.get_header("destination")
    }

    /// Serialize the frame, adding `content-length` for non-empty bodies.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let mut out = Vec::with_capacity(64 + body.len());

        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            if self.command.escapes_headers() {
                out.extend_from_slice(escape(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }

        if !body.is_empty() && self.get_header("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(body);
        out.push(0);
        out
    }
}

/// Decode every frame in one transport message.
///
/// Leading end-of-line heart-beats are skipped, so a message that is only a
/// heart-beat yields an empty vector. `binary` selects whether bodies are kept
/// as raw bytes or validated as text.
pub fn decode_frames(input: &[u8], binary: bool) -> Result<Vec<Frame>, FrameError> {
    match decode_frames_partial(input, binary) {
        (frames, None) => Ok(frames),
        (_, Some(e)) => Err(e),
    }
}

/// Decode frames up to the first malformed one.
///
/// Frames that precede the error are returned along with it, so a bad
/// trailing frame does not cost the valid ones before it.
pub fn decode_frames_partial(input: &[u8], binary: bool) -> (Vec<Frame>, Option<FrameError>) {
    let mut frames = Vec::new();
    let mut rest = skip_eols(input);

    while !rest.is_empty() {
        match decode_frame(rest, binary) {
            Ok((frame, consumed)) => {
                frames.push(frame);
                rest = skip_eols(rest.get(consumed..).unwrap_or_default());
            }
            Err(e) => return (frames, Some(e)),
        }
    }

    (frames, None)
}

fn skip_eols(mut input: &[u8]) -> &[u8] {
    loop {
        match input {
            [b'\n', rest @ ..] | [b'\r', b'\n', rest @ ..] => input = rest,
            _ => return input,
        }
    }
}

/// Read one line starting at `pos`, stripping an optional trailing CR.
fn next_line<'a>(input: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let start = *pos;
    let offset = input.get(start..)?.iter().position(|&b| b == b'\n')?;
    let end = start + offset;
    *pos = end + 1;

    let line = input.get(start..end)?;
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

fn decode_frame(input: &[u8], binary: bool) -> Result<(Frame, usize), FrameError> {
    let mut pos = 0;

    let command_line = next_line(input, &mut pos).ok_or(FrameError::Unterminated)?;
    let command = Command::parse(std::str::from_utf8(command_line)?)?;

    let mut headers = Vec::new();
    loop {
        let line = next_line(input, &mut pos).ok_or(FrameError::Unterminated)?;
        if line.is_empty() {
            break;
        }

        let line = std::str::from_utf8(line)?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;

        if command.escapes_headers() {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|e| FrameError::InvalidContentLength(format!("{value}: {e}")))
        })
        .transpose()?;

    let body_start = pos;
    let body_end = match content_length {
        Some(len) => {
            let end = body_start.checked_add(len).ok_or(FrameError::Unterminated)?;
            if input.get(end) != Some(&0) {
                return Err(FrameError::Unterminated);
            }
            end
        }
        None => {
            let nul = input
                .get(body_start..)
                .and_then(|rest| rest.iter().position(|&b| b == 0))
                .ok_or(FrameError::Unterminated)?;
            body_start + nul
        }
    };

    let raw = input.get(body_start..body_end).ok_or(FrameError::Unterminated)?;
    let body = if binary {
        Body::Binary(raw.to_vec())
    } else {
        Body::Text(std::str::from_utf8(raw)?.to_owned())
    };

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        body_end + 1,
    ))
}

fn escape(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['\\', '\n', '\r', ':']) {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

fn unescape(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }

    Ok(out)
}
