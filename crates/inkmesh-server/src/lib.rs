//! Inkmesh WebSocket Relay Server
//!
//! Relays replication traffic between clients in the same room and keeps a
//! merged replica per room, so a late joiner receives the full room state in
//! its `joined` reply.
//!
//! ## Protocol
//!
//! JSON text frames, tagged by `type`:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "sync", "data": "<base64-encoded-loro-bytes>" }
//! { "type": "awareness", "peer_id": 123, "cursor": { "x": 100, "y": 200 } }
//! ```
//! Binary frames are treated as raw sync data.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use inkmesh_core::sync::{ClientMessage, ServerMessage, decode_payload, encode_payload};
use loro::{ExportMode, LoroDoc};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3030";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Sender id used for messages the relay originates.
pub const RELAY_PEER_ID: &str = "relay";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid {key}: {message}")]
    Config { key: &'static str, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Server settings, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    /// Per-room broadcast buffer. A subscriber further behind than this is
    /// resynchronized from the room replica.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// `INKMESH_ADDR` and `INKMESH_CHANNEL_CAPACITY`.
    pub fn from_env() -> RelayResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RelayResult<Self> {
        let addr = lookup("INKMESH_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| RelayError::Config {
                key: "INKMESH_ADDR",
                message: e.to_string(),
            })?;
        let channel_capacity = match lookup("INKMESH_CHANNEL_CAPACITY") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => {
                    return Err(RelayError::Config {
                        key: "INKMESH_CHANNEL_CAPACITY",
                        message: "must be positive".to_string(),
                    });
                }
                Ok(capacity) => capacity,
                Err(e) => {
                    return Err(RelayError::Config {
                        key: "INKMESH_CHANNEL_CAPACITY",
                        message: e.to_string(),
                    });
                }
            },
            None => DEFAULT_CHANNEL_CAPACITY,
        };
        Ok(Self {
            addr,
            channel_capacity,
        })
    }
}

/// A relayed message and the peer that sent it.
type Envelope = (String, ServerMessage);

struct Room {
    tx: broadcast::Sender<Envelope>,
    peers: HashSet<String>,
    /// Every update relayed into this room, merged.
    replica: LoroDoc,
    has_state: bool,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            peers: HashSet::new(),
            replica: LoroDoc::new(),
            has_state: false,
        }
    }

    fn snapshot(&self) -> Option<String> {
        if !self.has_state {
            return None;
        }
        match self.replica.export(ExportMode::Snapshot) {
            Ok(bytes) => Some(encode_payload(&bytes)),
            Err(e) => {
                warn!("Failed to export room snapshot: {}", e);
                None
            }
        }
    }
}

/// What a joining peer gets back.
struct Joined {
    rx: broadcast::Receiver<Envelope>,
    snapshot: Option<String>,
    peer_count: usize,
}

/// Shared relay state: the active rooms.
pub struct RelayState {
    rooms: DashMap<String, Room>,
    channel_capacity: usize,
}

impl RelayState {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.peers.len())
    }

    fn join_room(&self, room_id: &str, peer_id: &str) -> Joined {
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(self.channel_capacity));
        room.peers.insert(peer_id.to_string());
        Joined {
            rx: room.tx.subscribe(),
            snapshot: room.snapshot(),
            peer_count: room.peers.len(),
        }
    }

    /// Remove a peer. Empty rooms are dropped with their replica; the next
    /// joiner re-uploads its full state.
    fn leave_room(&self, room_id: &str, peer_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.peers.remove(peer_id);
            if room.peers.is_empty() {
                drop(room);
                self.rooms.remove(room_id);
                debug!("Room {} closed", room_id);
            }
        }
    }

    /// Merge an update into the room replica.
    fn apply_update(&self, room_id: &str, bytes: &[u8]) -> Result<(), String> {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return Err(format!("unknown room {room_id}"));
        };
        room.replica.import(bytes).map_err(|e| e.to_string())?;
        room.has_state = true;
        Ok(())
    }

    fn snapshot(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).and_then(|room| room.snapshot())
    }

    fn broadcast(&self, room_id: &str, from: &str, message: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            // No receivers is fine.
            let _ = room.tx.send((from.to_string(), message));
        }
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// One connected client.
struct Session {
    peer_id: String,
    room: Option<String>,
    rx: Option<broadcast::Receiver<Envelope>>,
}

impl Session {
    fn new() -> Self {
        Self {
            peer_id: Uuid::new_v4().to_string(),
            room: None,
            rx: None,
        }
    }

    /// Handle a text frame. Returns the direct reply, if any.
    fn handle_text(&mut self, state: &RelayState, text: &str) -> Option<ServerMessage> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(state, message),
            Err(e) => {
                warn!("Invalid message from {}: {}", self.peer_id, e);
                Some(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                })
            }
        }
    }

    fn handle_binary(&mut self, state: &RelayState, bytes: &[u8]) -> Option<ServerMessage> {
        self.relay_update(state, bytes, encode_payload(bytes))
    }

    fn handle(&mut self, state: &RelayState, message: ClientMessage) -> Option<ServerMessage> {
        match message {
            ClientMessage::Join { room } => {
                self.leave(state);
                let joined = state.join_room(&room, &self.peer_id);
                self.rx = Some(joined.rx);
                self.room = Some(room.clone());
                state.broadcast(
                    &room,
                    &self.peer_id,
                    ServerMessage::PeerJoined {
                        peer_id: self.peer_id.clone(),
                    },
                );
                info!("Peer {} joined room {}", self.peer_id, room);
                Some(ServerMessage::Joined {
                    room,
                    peer_count: joined.peer_count,
                    snapshot: joined.snapshot,
                })
            }
            ClientMessage::Leave => {
                self.leave(state);
                None
            }
            ClientMessage::Sync { data } => match decode_payload(&data) {
                Ok(bytes) => self.relay_update(state, &bytes, data),
                Err(e) => Some(ServerMessage::Error {
                    message: format!("Invalid sync payload: {e}"),
                }),
            },
            ClientMessage::Awareness {
                peer_id,
                state: awareness,
            } => {
                if let Some(room) = &self.room {
                    state.broadcast(
                        room,
                        &self.peer_id,
                        ServerMessage::Awareness {
                            from: self.peer_id.clone(),
                            peer_id,
                            state: awareness,
                        },
                    );
                }
                None
            }
        }
    }

    fn relay_update(&self, state: &RelayState, bytes: &[u8], data: String) -> Option<ServerMessage> {
        let Some(room) = &self.room else {
            return Some(ServerMessage::Error {
                message: "Not in a room".to_string(),
            });
        };
        if let Err(e) = state.apply_update(room, bytes) {
            warn!("Rejected update from {}: {}", self.peer_id, e);
            return Some(ServerMessage::Error {
                message: format!("Invalid update: {e}"),
            });
        }
        state.broadcast(
            room,
            &self.peer_id,
            ServerMessage::Sync {
                from: self.peer_id.clone(),
                data,
            },
        );
        None
    }

    fn leave(&mut self, state: &RelayState) {
        self.rx = None;
        if let Some(room) = self.room.take() {
            state.leave_room(&room, &self.peer_id);
            state.broadcast(
                &room,
                &self.peer_id,
                ServerMessage::PeerLeft {
                    peer_id: self.peer_id.clone(),
                },
            );
            info!("Peer {} left room {}", self.peer_id, room);
        }
    }

    /// Turn a broadcast receive into a frame for this client. Lagging
    /// clients get the whole room state instead of the updates they missed.
    fn on_broadcast(
        &mut self,
        state: &RelayState,
        received: Result<Envelope, RecvError>,
    ) -> Option<ServerMessage> {
        match received {
            Ok((from, message)) => (from != self.peer_id).then_some(message),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Peer {} lagged by {} messages, resending room state", self.peer_id, skipped);
                let room = self.room.as_deref()?;
                state.snapshot(room).map(|data| ServerMessage::Sync {
                    from: RELAY_PEER_ID.to_string(),
                    data,
                })
            }
            Err(RecvError::Closed) => {
                self.rx = None;
                None
            }
        }
    }
}

async fn next_broadcast(rx: &mut Option<broadcast::Receiver<Envelope>>) -> Result<Envelope, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// The relay's routes over shared state.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process stops.
pub async fn serve(config: RelayConfig) -> RelayResult<()> {
    let state = Arc::new(RelayState::new(config.channel_capacity));
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("Inkmesh relay server listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index() -> &'static str {
    "Inkmesh Relay Server - Connect via WebSocket at /ws"
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let mut session = Session::new();
    info!("New connection: {}", session.peer_id);
    let (mut sender, mut receiver) = socket.split();

    loop {
        let reply = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => session.handle_text(&state, text.as_str()),
                Some(Ok(Message::Binary(bytes))) => session.handle_binary(&state, &bytes),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => None,
                Some(Err(e)) => {
                    warn!("WebSocket error for {}: {}", session.peer_id, e);
                    break;
                }
            },
            received = next_broadcast(&mut session.rx) => session.on_broadcast(&state, received),
        };
        let Some(reply) = reply else {
            continue;
        };
        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode reply for {}: {}", session.peer_id, e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }

    session.leave(&state);
    info!("Connection closed: {}", session.peer_id);
}
