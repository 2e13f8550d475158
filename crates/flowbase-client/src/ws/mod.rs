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

//! Async STOMP-over-WebSocket connection with automatic reconnection.
//!
//! A [`Connection`] runs in a background task: it opens the WebSocket, performs
//! the STOMP CONNECT handshake, subscribes to the configured destinations and
//! forwards inbound frames as [`ConnectionEvent`]s. Heart-beats are negotiated
//! with the broker, and a silent broker is treated as a dead link. After any
//! disconnect the task waits `reconnect_delay` and starts over until it is
//! shut down.

use std::future::pending;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::{ProtocolError, SubProtocolError};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::stomp::{decode_frames_partial, Body, Command, Frame, FrameError, HeartBeat};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Default broker endpoint.
pub const DEFAULT_BROKER_URL: &str = "ws://localhost:8080/ws";

/// STOMP versions offered in CONNECT.
const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Errors raised by a connection session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("invalid frame from broker: {0}")]
    Frame(#[from] FrameError),

    #[error("invalid broker request: {0}")]
    InvalidRequest(String),

    #[error("broker rejected connection: {message}")]
    Rejected { message: String, body: String },

    #[error("connection closed during STOMP handshake")]
    ClosedDuringHandshake,

    #[error("no data from broker within {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("send queue is full")]
    SendQueueFull,

    #[error("connection is shut down")]
    Closed,
}

impl From<tungstenite::Error> for ConnectionError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

/// Configuration for broker connections.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL of the STOMP endpoint.
    pub broker_url: String,
    /// Interval at which we want to hear from the broker. Zero disables.
    pub heartbeat_incoming: Duration,
    /// Interval at which we can send heart-beats. Zero disables.
    pub heartbeat_outgoing: Duration,
    /// Delay before reconnecting after disconnect. Zero disables reconnection.
    pub reconnect_delay: Duration,
    /// WebSocket sub-protocols offered during the upgrade.
    pub protocols: Vec<String>,
    /// Extra CONNECT headers such as `login` and `passcode`.
    pub connect_headers: Vec<(String, String)>,
    /// Channel buffer size for events and outbound frames.
    pub buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            heartbeat_incoming: Duration::from_millis(4000),
            heartbeat_outgoing: Duration::from_millis(4000),
            reconnect_delay: Duration::from_millis(5000),
            protocols: vec![
                "v12.stomp".to_string(),
                "v11.stomp".to_string(),
                "v10.stomp".to_string(),
            ],
            connect_headers: Vec::new(),
            buffer_size: 1024,
        }
    }
}

impl ConnectionConfig {
    fn heartbeat(&self) -> HeartBeat {
        HeartBeat::new(self.heartbeat_outgoing, self.heartbeat_incoming)
    }
}

/// Connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to connect.
    Connecting,
    /// STOMP session established.
    Connected,
    /// Disconnected (may attempt reconnect).
    Disconnected,
    /// Connection error occurred.
    Error(String),
}

/// Events emitted by the connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// STOMP session established; carries the CONNECTED frame.
    Connected(Frame),
    /// MESSAGE frame for one of the subscriptions.
    Message(Frame),
    /// ERROR frame from the broker.
    StompError {
        message: Option<String>,
        body: String,
    },
}

#[derive(Debug)]
struct OutboundFrame {
    destination: String,
    body: String,
}

impl OutboundFrame {
    fn into_frame(self) -> Frame {
        Frame::new(Command::Send)
            .header("destination", self.destination)
            .header("content-type", "text/plain")
            .with_body(Body::Text(self.body))
    }
}

/// Caller-owned control side of a connection.
///
/// Dropping the handle shuts the connection down.
#[derive(Debug)]
pub struct ConnectionHandle {
    broker_url: String,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel_token: CancellationToken,
}

impl ConnectionHandle {
    /// Queue a SEND frame. It is written once the session is established.
    pub fn send(
        &self,
        destination: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<(), ConnectionError> {
        let frame = OutboundFrame {
            destination: destination.into(),
            body: body.into(),
        };
        self.outbound_tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::SendQueueFull,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Broker URL this connection targets.
    #[must_use]
    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Shut down the connection.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// A managed broker connection.
///
/// The connection runs in a background task and automatically reconnects
/// on disconnect. Use `recv()` to receive events, or `into_parts()` to hand
/// the event stream to another task while keeping the handle.
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl Connection {
    /// Spawn a new connection task subscribing to `subscriptions`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: ConnectionConfig, subscriptions: Vec<String>) -> Self {
        let buffer_size = config.buffer_size.max(1);
        let (event_tx, event_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel_token = CancellationToken::new();

        let handle = ConnectionHandle {
            broker_url: config.broker_url.clone(),
            outbound_tx,
            state_rx,
            cancel_token: cancel_token.clone(),
        };

        let session = Session {
            config,
            subscriptions,
            event_tx,
            state_tx,
            outbound_rx,
            cancel_token,
        };
        tokio::spawn(session.run());

        Self { handle, event_rx }
    }

    /// Receive the next event from the connection.
    ///
    /// Returns `None` once the connection task has finished.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Control handle for this connection.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Split into the control handle and the event stream.
    #[must_use]
    pub fn into_parts(self) -> (ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
        (self.handle, self.event_rx)
    }
}

enum SessionEnd {
    ClosedByServer,
    Cancelled,
    ReceiverDropped,
}

struct Session {
    config: ConnectionConfig,
    subscriptions: Vec<String>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::Receiver<OutboundFrame>,
    cancel_token: CancellationToken,
}

impl Session {
    async fn run(mut self) {
        loop {
            if self.cancel_token.is_cancelled() {
                info!("Connection cancelled");
                break;
            }

            if !self.set_state(ConnectionState::Connecting).await {
                return;
            }

            info!("Connecting to {}...", self.config.broker_url);

            match self.connect_and_process().await {
                Ok(SessionEnd::Cancelled) => {
                    info!("Connection cancelled");
                    break;
                }
                Ok(SessionEnd::ReceiverDropped) => return,
                Ok(SessionEnd::ClosedByServer) => {
                    info!("Connection closed by broker");
                    if !self.set_state(ConnectionState::Disconnected).await {
                        return;
                    }
                }
                Err(e) => {
                    error!("Connection error: {}", e);
                    if !self.set_state(ConnectionState::Error(e.to_string())).await {
                        return;
                    }
                }
            }

            let delay = self.config.reconnect_delay;
            if delay.is_zero() {
                info!("Reconnection disabled, giving up");
                break;
            }

            warn!("Reconnecting in {} ms...", delay.as_millis());

            tokio::select! {
                () = sleep(delay) => {}
                () = self.cancel_token.cancelled() => {
                    info!("Connection cancelled during reconnect delay");
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Publish a state change. Returns false once nobody is listening.
    async fn set_state(&self, state: ConnectionState) -> bool {
        self.state_tx.send_replace(state.clone());
        self.emit(ConnectionEvent::StateChanged(state)).await
    }

    async fn emit(&self, event: ConnectionEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }

    async fn connect_and_process(&mut self) -> Result<SessionEnd, ConnectionError> {
        let cancel_token = self.cancel_token.clone();
        let (ws, host) = tokio::select! {
            result = self.open_socket() => result?,
            () = cancel_token.cancelled() => return Ok(SessionEnd::Cancelled),
        };
        debug!("WebSocket open to {}", self.config.broker_url);

        let (mut sink, mut source) = ws.split();

        send_frame(&mut sink, &connect_frame(&self.config, host.as_deref())).await?;

        let connected = tokio::select! {
            result = self.await_connected(&mut source) => result?,
            () = self.cancel_token.cancelled() => {
                let _ = sink.close().await;
                return Ok(SessionEnd::Cancelled);
            }
        };

        let server_heartbeat = connected
            .get_header("heart-beat")
            .and_then(HeartBeat::parse)
            .unwrap_or_default();
        let (send_every, expect_within) = self.config.heartbeat().negotiate(server_heartbeat);

        info!(
            "Connected to {} (STOMP {})",
            self.config.broker_url,
            connected.get_header("version").unwrap_or("1.0")
        );
        debug!(
            "Heart-beat send every {:?}, expect within {:?}",
            send_every, expect_within
        );

        if !self.set_state(ConnectionState::Connected).await
            || !self.emit(ConnectionEvent::Connected(connected)).await
        {
            return Ok(SessionEnd::ReceiverDropped);
        }

        for (index, destination) in self.subscriptions.iter().enumerate() {
            let subscribe = Frame::new(Command::Subscribe)
                .header("id", format!("sub-{index}"))
                .header("destination", destination.as_str());
            send_frame(&mut sink, &subscribe).await?;
            info!("Subscribed to {}", destination);
        }

        let mut heartbeat = send_every.map(ticker);
        let mut watchdog = expect_within.map(ticker);
        let mut last_received = Instant::now();

        loop {
            tokio::select! {
                message = source.next() => {
                    match message {
                        Some(Ok(message)) => {
                            last_received = Instant::now();
                            let Some(frames) = frames_from(&message) else {
                                return Ok(SessionEnd::ClosedByServer);
                            };
                            for frame in frames {
                                if !self.dispatch(frame).await {
                                    return Ok(SessionEnd::ReceiverDropped);
                                }
                            }
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::ClosedByServer),
                    }
                }

                outbound = self.outbound_rx.recv() => {
                    let Some(outbound) = outbound else {
                        disconnect(&mut sink).await;
                        return Ok(SessionEnd::Cancelled);
                    };
                    send_frame(&mut sink, &outbound.into_frame()).await?;
                }

                () = tick(&mut heartbeat) => {
                    trace!("STOMP >>> heart-beat");
                    sink.send(Message::text("\n")).await?;
                }

                () = tick(&mut watchdog) => {
                    if let Some(limit) = expect_within {
                        if last_received.elapsed() > limit * 2 {
                            return Err(ConnectionError::HeartbeatTimeout(limit * 2));
                        }
                    }
                }

                () = self.cancel_token.cancelled() => {
                    // Frames queued before shutdown still go out ahead of DISCONNECT.
                    while let Ok(outbound) = self.outbound_rx.try_recv() {
                        send_frame(&mut sink, &outbound.into_frame()).await?;
                    }
                    disconnect(&mut sink).await;
                    return Ok(SessionEnd::Cancelled);
                }
            }
        }
    }

    /// Open the WebSocket and return it with the host to name in CONNECT.
    ///
    /// Brokers that ignore the STOMP sub-protocol offer fail the upgrade; the
    /// offer is then withdrawn for this and every later attempt.
    async fn open_socket(&mut self) -> Result<(WsStream, Option<String>), ConnectionError> {
        let request = build_request(&self.config.broker_url, &self.config.protocols)?;
        let host = request.uri().host().map(ToString::to_string);

        match connect_async(request).await {
            Ok((ws, _response)) => Ok((ws, host)),
            Err(tungstenite::Error::Protocol(ProtocolError::SecWebSocketSubProtocolError(
                SubProtocolError::NoSubProtocol,
            ))) if !self.config.protocols.is_empty() => {
                warn!(
                    "{} selected no STOMP sub-protocol, retrying without the offer",
                    self.config.broker_url
                );
                self.config.protocols.clear();
                let request = build_request(&self.config.broker_url, &[])?;
                let (ws, _response) = connect_async(request).await?;
                Ok((ws, host))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for CONNECTED; an ERROR frame here means the broker refused us.
    async fn await_connected(&self, source: &mut WsSource) -> Result<Frame, ConnectionError> {
        while let Some(message) = source.next().await {
            let Some(frames) = frames_from(&message?) else {
                break;
            };
            for frame in frames {
                match frame.command {
                    Command::Connected => return Ok(frame),
                    Command::Error => {
                        let message = frame.get_header("message").unwrap_or_default().to_string();
                        let body = frame.body.to_text().unwrap_or_default().into_owned();
                        self.emit(ConnectionEvent::StompError {
                            message: Some(message.clone()),
                            body: body.clone(),
                        })
                        .await;
                        return Err(ConnectionError::Rejected { message, body });
                    }
                    other => debug!("Ignoring {} frame before CONNECTED", other),
                }
            }
        }
        Err(ConnectionError::ClosedDuringHandshake)
    }

    /// Route one inbound frame. Returns false once nobody is listening.
    async fn dispatch(&self, frame: Frame) -> bool {
        debug!("STOMP <<< {} {:?}", frame.command, frame.headers);
        trace!("STOMP <<< body: {:?}", frame.body.to_text());

        match frame.command {
            Command::Message => self.emit(ConnectionEvent::Message(frame)).await,
            Command::Error => {
                let message = frame.get_header("message").map(ToString::to_string);
                let body = frame.body.to_text().unwrap_or_default().into_owned();
                self.emit(ConnectionEvent::StompError { message, body }).await
            }
            _ => true,
        }
    }
}

fn build_request(broker_url: &str, protocols: &[String]) -> Result<Request, ConnectionError> {
    let mut request = broker_url.into_client_request()?;

    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }

    Ok(request)
}

fn connect_frame(config: &ConnectionConfig, host: Option<&str>) -> Frame {
    let mut frame = Frame::new(Command::Connect)
        .header("accept-version", ACCEPT_VERSION)
        .header("heart-beat", config.heartbeat().to_header());

    if let Some(host) = host {
        frame = frame.header("host", host);
    }
    for (name, value) in &config.connect_headers {
        frame = frame.header(name.as_str(), value.as_str());
    }
    frame
}

/// Frames carried by one WebSocket message, or `None` for a close.
fn frames_from(message: &Message) -> Option<Vec<Frame>> {
    let (frames, error) = match message {
        Message::Text(text) => decode_frames_partial(text.as_bytes(), false),
        Message::Binary(bytes) => decode_frames_partial(bytes, true),
        Message::Close(reason) => {
            debug!("WebSocket close received: {:?}", reason);
            return None;
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => (Vec::new(), None),
    };

    if let Some(e) = error {
        warn!(
            "Dropping undecodable STOMP data after {} frame(s): {}",
            frames.len(),
            e
        );
    }
    Some(frames)
}

async fn send_frame(sink: &mut WsSink, frame: &Frame) -> Result<(), ConnectionError> {
    debug!("STOMP >>> {} {:?}", frame.command, frame.headers);

    let bytes = frame.encode();
    let message = match &frame.body {
        Body::Binary(_) => Message::binary(bytes),
        Body::Text(_) => match String::from_utf8(bytes) {
            Ok(text) => Message::text(text),
            Err(e) => Message::binary(e.into_bytes()),
        },
    };

    sink.send(message).await?;
    Ok(())
}

async fn disconnect(sink: &mut WsSink) {
    if let Err(e) = send_frame(sink, &Frame::new(Command::Disconnect)).await {
        debug!("DISCONNECT not delivered: {}", e);
    }
    let _ = sink.close().await;
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}


#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use super::loopback::{accept_stomp, await_disconnect, send_text, CONNECTED};
    use super::*;

    fn loopback_config(addr: SocketAddr) -> ConnectionConfig {
        ConnectionConfig {
            broker_url: format!("ws://{addr}/ws"),
            reconnect_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<ConnectionEvent>) -> Option<ConnectionEvent> {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a connection event")
    }

    /// Wait for `Connected`, failing on any error state seen first.
    async fn await_connected_event(events: &mut mpsc::Receiver<ConnectionEvent>) {
        loop {
            match next_event(events).await {
                Some(ConnectionEvent::Connected(_)) => return,
                Some(ConnectionEvent::StateChanged(ConnectionState::Error(e))) => {
                    panic!("connection failed: {e}")
                }
                Some(_) => {}
                None => panic!("connection task ended before CONNECTED"),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.broker_url, "ws://localhost:8080/ws");
        assert_eq!(config.heartbeat().to_header(), "4000,4000");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_build_request_offers_stomp_protocols() {
        let config = ConnectionConfig::default();
        let request = build_request(&config.broker_url, &config.protocols).unwrap();
        assert_eq!(request.uri().host(), Some("localhost"));
        assert_eq!(
            request.headers().get("Sec-WebSocket-Protocol").unwrap(),
            "v12.stomp, v11.stomp, v10.stomp"
        );
    }

    #[test]
    fn test_build_request_rejects_bad_url() {
        assert!(build_request("not a url", &[]).is_err());
    }

    #[test]
    fn test_build_request_without_protocols() {
        let request = build_request(DEFAULT_BROKER_URL, &[]).unwrap();
        assert!(request.headers().get("Sec-WebSocket-Protocol").is_none());
    }

    #[test]
    fn test_connect_frame_headers() {
        let config = ConnectionConfig {
            connect_headers: vec![("login".to_string(), "guest".to_string())],
            ..Default::default()
        };
        let frame = connect_frame(&config, Some("localhost"));

        assert_eq!(frame.command, Command::Connect);
        assert_eq!(frame.get_header("accept-version"), Some("1.2,1.1,1.0"));
        assert_eq!(frame.get_header("heart-beat"), Some("4000,4000"));
        assert_eq!(frame.get_header("host"), Some("localhost"));
        assert_eq!(frame.get_header("login"), Some("guest"));
    }

    #[test]
    fn test_frames_from_messages() {
        let text = Message::text("MESSAGE\ndestination:/topic/x\n\nhi\0");
        let frames = frames_from(&text).unwrap();
        assert_eq!(frames[0].body, Body::Text("hi".to_string()));

        let binary = Message::binary(b"MESSAGE\ndestination:/topic/x\n\nhi\0".to_vec());
        let frames = frames_from(&binary).unwrap();
        assert_eq!(frames[0].body, Body::Binary(b"hi".to_vec()));

        assert!(frames_from(&Message::text("\n")).unwrap().is_empty());

        let mixed = Message::text("MESSAGE\ndestination:/topic/x\n\nkept\0BOGUS\n\n\0");
        let frames = frames_from(&mixed).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body, Body::Text("kept".to_string()));
        assert!(frames_from(&Message::Close(None)).is_none());
    }

    #[tokio::test]
    async fn test_handle_send_after_shutdown() {
        let connection = Connection::spawn(
            ConnectionConfig {
                broker_url: "ws://127.0.0.1:1/ws".to_string(),
                reconnect_delay: Duration::ZERO,
                ..Default::default()
            },
            Vec::new(),
        );
        let (handle, mut events) = connection.into_parts();
        handle.shutdown();
        assert!(handle.is_shut_down());

        // The task ends after shutdown, closing the event stream.
        while events.recv().await.is_some() {}
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(matches!(
            handle.send("/app/x", "body"),
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_default_protocols_fall_back_when_broker_selects_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut ws, connect) = accept_stomp(&listener).await;
            assert_eq!(connect.get_header("accept-version"), Some("1.2,1.1,1.0"));
            send_text(&mut ws, CONNECTED).await;
            await_disconnect(&mut ws).await;
        });

        let config = loopback_config(addr);
        assert_eq!(config.protocols.len(), 3);
        let (handle, mut events) = Connection::spawn(config, Vec::new()).into_parts();

        await_connected_event(&mut events).await;
        assert_eq!(handle.state(), ConnectionState::Connected);

        handle.shutdown();
        timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_silent_broker_trips_watchdog_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut silent, _) = accept_stomp(&listener).await;
            send_text(&mut silent, "CONNECTED\nversion:1.2\nheart-beat:100,0\n\n\0").await;

            // Keep the first socket open but quiet while the client gives up on it.
            let (mut ws, connect) = accept_stomp(&listener).await;
            send_text(&mut ws, CONNECTED).await;
            await_disconnect(&mut ws).await;
            drop(silent);
            connect.command
        });

        let config = ConnectionConfig {
            heartbeat_incoming: Duration::from_millis(100),
            heartbeat_outgoing: Duration::ZERO,
            reconnect_delay: Duration::from_millis(50),
            protocols: Vec::new(),
            ..loopback_config(addr)
        };
        let (handle, mut events) = Connection::spawn(config, Vec::new()).into_parts();

        await_connected_event(&mut events).await;

        let mut timed_out = false;
        loop {
            match next_event(&mut events).await {
                Some(ConnectionEvent::StateChanged(ConnectionState::Error(e))) => {
                    assert_eq!(e, "no data from broker within 200ms");
                    timed_out = true;
                }
                Some(ConnectionEvent::Connected(_)) => break,
                Some(_) => {}
                None => panic!("connection task ended before reconnecting"),
            }
        }
        assert!(timed_out);

        handle.shutdown();
        let command = timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
        assert_eq!(command, Command::Connect);
    }

    #[tokio::test]
    async fn test_reconnects_after_broker_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut first, _) = accept_stomp(&listener).await;
            send_text(&mut first, CONNECTED).await;
            first.close(None).await.unwrap();

            let (mut second, _) = accept_stomp(&listener).await;
            send_text(&mut second, CONNECTED).await;
            await_disconnect(&mut second).await;
        });

        let config = ConnectionConfig {
            reconnect_delay: Duration::from_millis(50),
            protocols: Vec::new(),
            ..loopback_config(addr)
        };
        let (handle, mut events) = Connection::spawn(config, Vec::new()).into_parts();

        await_connected_event(&mut events).await;
        loop {
            match next_event(&mut events).await {
                Some(ConnectionEvent::StateChanged(ConnectionState::Disconnected)) => break,
                Some(ConnectionEvent::StateChanged(ConnectionState::Error(e))) => {
                    panic!("expected a clean close, got {e}")
                }
                Some(_) => {}
                None => panic!("connection task ended after the broker closed"),
            }
        }
        await_connected_event(&mut events).await;

        handle.shutdown();
        timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_error_frame_during_session_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut ws, _) = accept_stomp(&listener).await;
            send_text(&mut ws, CONNECTED).await;
            send_text(&mut ws, "ERROR\nmessage:boom\n\nsomething went wrong\0").await;
            await_disconnect(&mut ws).await;
        });

        let config = ConnectionConfig {
            protocols: Vec::new(),
            ..loopback_config(addr)
        };
        let (handle, mut events) = Connection::spawn(config, Vec::new()).into_parts();

        await_connected_event(&mut events).await;
        loop {
            match next_event(&mut events).await {
                Some(ConnectionEvent::StompError { message, body }) => {
                    assert_eq!(message.as_deref(), Some("boom"));
                    assert_eq!(body, "something went wrong");
                    break;
                }
                Some(_) => {}
                None => panic!("connection task ended before the ERROR frame"),
            }
        }

        handle.shutdown();
        timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_error_frame_during_handshake_rejects_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut ws, _) = accept_stomp(&listener).await;
            send_text(&mut ws, "ERROR\nmessage:Bad credentials\n\nAccess denied\0").await;
        });

        let config = ConnectionConfig {
            protocols: Vec::new(),
            ..loopback_config(addr)
        };
        let (handle, mut events) = Connection::spawn(config, Vec::new()).into_parts();

        let mut seen = Vec::new();
        while let Some(event) = next_event(&mut events).await {
            seen.push(event);
        }

        let stomp_error = seen
            .iter()
            .position(|e| {
                matches!(e, ConnectionEvent::StompError { message: Some(m), body }
                    if m == "Bad credentials" && body == "Access denied")
            })
            .expect("ERROR frame was not reported");
        let rejected = seen
            .iter()
            .position(|e| {
                matches!(e, ConnectionEvent::StateChanged(ConnectionState::Error(m))
                    if m == "broker rejected connection: Bad credentials")
            })
            .expect("rejection was not reported");
        assert!(stomp_error < rejected);
        assert!(!seen.iter().any(|e| matches!(e, ConnectionEvent::Connected(_))));
        assert_eq!(handle.state(), ConnectionState::Disconnected);

        timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    }
}
