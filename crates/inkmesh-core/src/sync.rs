//! Replication channel: wire protocol and the native WebSocket client.
//!
//! Messages are JSON objects tagged by `type`. Document updates travel as
//! base64-encoded Loro update bytes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a replication channel.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported websocket scheme '{0}'")]
    Scheme(String),
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(String),
    #[error("malformed payload: {0}")]
    Payload(#[from] base64::DecodeError),
    #[error("malformed message: {0}")]
    Message(#[from] serde_json::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join { room: String },
    Leave,
    /// Loro update bytes, base64.
    Sync { data: String },
    Awareness {
        peer_id: u64,
        #[serde(flatten)]
        state: AwarenessState,
    },
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join confirmed. `snapshot` carries the room's full state when the
    /// room has any.
    Joined {
        room: String,
        peer_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    Sync { from: String, data: String },
    Awareness {
        from: String,
        peer_id: u64,
        #[serde(flatten)]
        state: AwarenessState,
    },
    Error { message: String },
}

/// Presence a peer shares with the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AwarenessState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub color: String,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events reported by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    JoinedRoom {
        room: String,
        peer_count: usize,
        snapshot: Option<Vec<u8>>,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    SyncReceived { from: String, data: Vec<u8> },
    AwarenessReceived {
        from: String,
        peer_id: u64,
        state: AwarenessState,
    },
    Error { message: String },
}

pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_payload(data: &str) -> SyncResult<Vec<u8>> {
    Ok(STANDARD.decode(data)?)
}

impl ClientMessage {
    pub fn sync(bytes: &[u8]) -> Self {
        ClientMessage::Sync {
            data: encode_payload(bytes),
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode payloads into a channel event.
    pub fn into_event(self) -> SyncResult<SyncEvent> {
        Ok(match self {
            ServerMessage::Joined {
                room,
                peer_count,
                snapshot,
            } => SyncEvent::JoinedRoom {
                room,
                peer_count,
                snapshot: snapshot.as_deref().map(decode_payload).transpose()?,
            },
            ServerMessage::PeerJoined { peer_id } => SyncEvent::PeerJoined { peer_id },
            ServerMessage::PeerLeft { peer_id } => SyncEvent::PeerLeft { peer_id },
            ServerMessage::Sync { from, data } => SyncEvent::SyncReceived {
                from,
                data: decode_payload(&data)?,
            },
            ServerMessage::Awareness {
                from,
                peer_id,
                state,
            } => SyncEvent::AwarenessReceived {
                from,
                peer_id,
                state,
            },
            ServerMessage::Error { message } => SyncEvent::Error { message },
        })
    }
}

/// Parse a relay text frame into an event.
pub fn parse_server_message(text: &str) -> SyncResult<SyncEvent> {
    serde_json::from_str::<ServerMessage>(text)?.into_event()
}

/// Transport between a replica and the relay.
///
/// Sends are fire-and-forget; incoming traffic is polled once per frame.
pub trait ReplicationChannel {
    fn send(&mut self, message: &str) -> SyncResult<()>;

    /// Drain events received since the last poll.
    fn poll_events(&mut self) -> Vec<SyncEvent>;

    fn state(&self) -> ConnectionState;

    fn close(&mut self);
}

mod native_client {
    use std::io::ErrorKind;
    use std::net::TcpStream;
    use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
    use std::thread;
    use std::time::Duration;

    use tungstenite::stream::MaybeTlsStream;
    use tungstenite::{Message, WebSocket};
    use url::Url;

    use super::*;

    /// How long a read may block before queued sends get a turn.
    const READ_SLICE: Duration = Duration::from_millis(50);
    const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    enum Outbound {
        Frame(String),
        Shutdown,
    }

    /// WebSocket client whose socket lives on a worker thread.
    ///
    /// The engine talks to it through two mpsc queues, so neither sends nor
    /// polls ever block the caller.
    pub struct NativeWebSocket {
        state: ConnectionState,
        outbound: Option<Sender<Outbound>>,
        inbound: Option<Receiver<SyncEvent>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                outbound: None,
                inbound: None,
            }
        }

        /// Open a client for a `ws://` or `wss://` url.
        pub fn open(url: &str) -> SyncResult<Self> {
            let mut client = Self::new();
            client.connect(url)?;
            Ok(client)
        }

        /// Start the handshake in the background. Frames sent before it
        /// completes wait in the queue.
        pub fn connect(&mut self, url: &str) -> SyncResult<()> {
            if self.outbound.is_some() {
                return Err(SyncError::AlreadyConnected);
            }
            let target = Url::parse(url)?;
            if !matches!(target.scheme(), "ws" | "wss") {
                return Err(SyncError::Scheme(target.scheme().to_owned()));
            }

            let (outbound, commands) = mpsc::channel();
            let (events, inbound) = mpsc::channel();
            thread::Builder::new()
                .name("inkmesh-ws".to_owned())
                .spawn(move || Worker { commands, events }.run(target.as_str()))
                .map_err(|e| SyncError::Send(format!("cannot start socket thread: {e}")))?;

            self.state = ConnectionState::Connecting;
            self.outbound = Some(outbound);
            self.inbound = Some(inbound);
            Ok(())
        }

        /// Ask the worker to close the socket and forget it.
        pub fn disconnect(&mut self) {
            if let Some(outbound) = self.outbound.take() {
                // The worker may already be gone.
                let _ = outbound.send(Outbound::Shutdown);
            }
            self.inbound = None;
            self.state = ConnectionState::Disconnected;
        }

        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }

        fn observe(&mut self, event: &SyncEvent) {
            self.state = match event {
                SyncEvent::Connected => ConnectionState::Connected,
                SyncEvent::Disconnected => ConnectionState::Disconnected,
                SyncEvent::Error { .. } => ConnectionState::Error,
                _ => return,
            };
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

    impl ReplicationChannel for NativeWebSocket {
        fn send(&mut self, message: &str) -> SyncResult<()> {
            let Some(outbound) = &self.outbound else {
                return Err(SyncError::NotConnected);
            };
            outbound
                .send(Outbound::Frame(message.to_owned()))
                .map_err(|_| SyncError::Send("socket thread has stopped".to_owned()))
        }

        fn poll_events(&mut self) -> Vec<SyncEvent> {
            let received: Vec<SyncEvent> = match &self.inbound {
                Some(inbound) => inbound.try_iter().collect(),
                None => return Vec::new(),
            };
            for event in &received {
                self.observe(event);
            }
            received
        }

        fn state(&self) -> ConnectionState {
            self.state
        }

        fn close(&mut self) {
            self.disconnect();
        }
    }

    type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

    struct Worker {
        commands: Receiver<Outbound>,
        events: Sender<SyncEvent>,
    }

    impl Worker {
        fn run(self, url: &str) {
            log::info!("connecting to {url}");
            let mut socket = match tungstenite::connect(url) {
                Ok((socket, response)) => {
                    log::info!("connected to relay ({})", response.status());
                    socket
                }
                Err(e) => {
                    log::error!("relay connection failed: {e}");
                    self.emit(SyncEvent::Error {
                        message: format!("connection failed: {e}"),
                    });
                    return;
                }
            };
            let tcp = match socket.get_ref() {
                MaybeTlsStream::Plain(tcp) => Some(tcp),
                MaybeTlsStream::Rustls(tls) => Some(&tls.sock),
                _ => None,
            };
            if let Some(tcp) = tcp {
                if let Err(e) = tcp
                    .set_read_timeout(Some(READ_SLICE))
                    .and_then(|()| tcp.set_write_timeout(Some(WRITE_TIMEOUT)))
                {
                    log::warn!("could not set socket timeouts: {e}");
                }
            }
            self.emit(SyncEvent::Connected);

            while self.flush(&mut socket) && self.receive(&mut socket) {}

            log::info!("relay connection closed");
            self.emit(SyncEvent::Disconnected);
        }

        fn emit(&self, event: SyncEvent) {
            if self.events.send(event).is_err() {
                log::trace!("client dropped; discarding event");
            }
        }

        /// Write every queued frame. `false` once the connection should end.
        fn flush(&self, socket: &mut Socket) -> bool {
            loop {
                match self.commands.try_recv() {
                    Ok(Outbound::Frame(text)) => {
                        log::trace!("-> {} bytes", text.len());
                        if let Err(e) = socket.send(Message::text(text)) {
                            log::error!("relay write failed: {e}");
                            return false;
                        }
                    }
                    Ok(Outbound::Shutdown) | Err(TryRecvError::Disconnected) => {
                        if let Err(e) = socket.close(None) {
                            log::debug!("close handshake failed: {e}");
                        }
                        return false;
                    }
                    Err(TryRecvError::Empty) => return true,
                }
            }
        }

        /// Wait up to one read slice for a frame. `false` once the
        /// connection should end.
        fn receive(&self, socket: &mut Socket) -> bool {
            match socket.read() {
                Ok(Message::Text(text)) => {
                    match parse_server_message(text.as_str()) {
                        Ok(event) => self.emit(event),
                        Err(e) => log::warn!("ignoring relay frame: {e}"),
                    }
                    true
                }
                Ok(Message::Close(frame)) => {
                    log::info!("relay closed the connection: {frame:?}");
                    false
                }
                // Pongs are queued by tungstenite itself.
                Ok(_) => true,
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    true
                }
                Err(e) => {
                    log::error!("relay read failed: {e}");
                    self.emit(SyncEvent::Error {
                        message: e.to_string(),
                    });
                    false
                }
            }
        }
    }
}

pub use native_client::NativeWebSocket;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        assert_eq!(encode_payload(b"a"), "YQ==");
        assert_eq!(decode_payload("YWJj").unwrap(), b"abc");
        assert!(decode_payload("not base64!").is_err());
    }

    #[test]
    fn test_client_message_serialize() {
        let json = ClientMessage::Join {
            room: "test-room".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"join","room":"test-room"}"#);

        let awareness = ClientMessage::Awareness {
            peer_id: 7,
            state: AwarenessState {
                cursor: Some(CursorPosition { x: 1.0, y: 2.0 }),
                user: None,
            },
        };
        let value: serde_json::Value = serde_json::from_str(&awareness.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "awareness");
        assert_eq!(value["cursor"]["x"], 1.0);
    }

    #[test]
    fn test_server_message_into_event() {
        let event =
            parse_server_message(r#"{"type":"joined","room":"test","peer_count":2}"#).unwrap();
        assert_eq!(
            event,
            SyncEvent::JoinedRoom {
                room: "test".into(),
                peer_count: 2,
                snapshot: None
            }
        );

        let event = parse_server_message(r#"{"type":"sync","from":"p1","data":"YWJj"}"#).unwrap();
        assert_eq!(
            event,
            SyncEvent::SyncReceived {
                from: "p1".into(),
                data: b"abc".to_vec()
            }
        );
        assert!(parse_server_message(r#"{"type":"sync","from":"p1","data":"%%"}"#).is_err());
        assert!(parse_server_message(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn test_connect_rejects_bad_urls() {
        let mut socket = NativeWebSocket::new();
        assert!(matches!(socket.connect("http://localhost"), Err(SyncError::Scheme(_))));
        assert!(matches!(socket.connect("not a url"), Err(SyncError::Url(_))));
        assert!(matches!(socket.send("x"), Err(SyncError::NotConnected)));
        assert_eq!(socket.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_idle_client_refuses_to_send() {
        let mut client = NativeWebSocket::default();
        assert!(matches!(client.send("{}"), Err(SyncError::NotConnected)));
        assert!(client.poll_events().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.connect("ftp://example.com"),
            Err(SyncError::Scheme(scheme)) if scheme == "ftp"
        ));
    }

    #[test]
    fn test_secure_urls_reach_the_tls_handshake() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            // Accept and hang up, so the handshake fails on the TLS layer.
            let _ = listener.accept();
        });

        let mut client = NativeWebSocket::open(&format!("wss://127.0.0.1:{port}/ws")).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let message = loop {
            assert!(std::time::Instant::now() < deadline, "no error reported");
            if let Some(SyncEvent::Error { message }) = client
                .poll_events()
                .into_iter()
                .find(|event| matches!(event, SyncEvent::Error { .. }))
            {
                break message;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        };
        assert!(!message.contains("not compiled"), "{message}");
    }
}
