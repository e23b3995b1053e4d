//! Bridge between the replicated document and a replication channel.
//!
//! Local edits are exported as incremental Loro updates since the last
//! flush; remote updates are imported into the document, whose change queue
//! then drives the scene. The manager only queues JSON text. The engine
//! moves it over whatever [`ReplicationChannel`](crate::sync::ReplicationChannel)
//! is attached.

use std::collections::HashMap;

use kurbo::Point;

use crate::crdt::{DocumentResult, ReplicatedDocument, VersionVector};
use crate::sync::{
    AwarenessState, ClientMessage, CursorPosition, SyncEvent, SyncResult, UserInfo,
    parse_server_message,
};

/// Presence of another participant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemotePeer {
    pub peer_id: u64,
    pub cursor: Option<Point>,
    pub user: Option<UserInfo>,
}

/// Room membership, sync status and outgoing traffic for one replica.
pub struct CollaborationManager {
    peer_id: u64,
    room: Option<String>,
    synchronized: bool,
    peer_count: usize,
    /// Version covered by updates already queued for the relay.
    last_sent: VersionVector,
    awareness: AwarenessState,
    peers: HashMap<String, RemotePeer>,
    outgoing: Vec<String>,
}

impl CollaborationManager {
    pub fn new(peer_id: u64) -> Self {
        Self {
            peer_id,
            room: None,
            synchronized: false,
            peer_count: 0,
            last_sent: VersionVector::default(),
            awareness: AwarenessState::default(),
            peers: HashMap::new(),
            outgoing: Vec::new(),
        }
    }

    pub fn peer_id(&self) -> u64 {
        self.peer_id
    }

    pub fn current_room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn is_in_room(&self) -> bool {
        self.room.is_some()
    }

    /// True once the relay's join reply, with the room's full state, has
    /// been applied to the document.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Participants in the room, this replica included.
    pub fn peer_count(&self) -> usize {
        self.peer_count
    }

    // --- Room management ---

    /// Queue a join. Sync stays off until the relay answers.
    pub fn join_room(&mut self, room: &str) {
        self.room = Some(room.to_string());
        self.synchronized = false;
        self.peers.clear();
        self.queue(&ClientMessage::Join {
            room: room.to_string(),
        });
    }

    pub fn leave_room(&mut self) {
        if self.room.take().is_some() {
            self.queue(&ClientMessage::Leave);
        }
        self.synchronized = false;
        self.peer_count = 0;
        self.peers.clear();
    }

    /// Drain queued JSON messages.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    fn queue(&mut self, message: &ClientMessage) {
        match message.to_json() {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::warn!("failed to encode outgoing message: {e}"),
        }
    }

    // --- Document sync ---

    /// Queue local changes made since the last flush. Returns whether a
    /// sync message was queued. Does nothing before the room state arrived.
    pub fn flush_local(&mut self, doc: &ReplicatedDocument) -> DocumentResult<bool> {
        if !self.synchronized {
            return Ok(false);
        }
        let version = doc.version();
        if version == self.last_sent {
            return Ok(false);
        }
        let bytes = doc.export_updates(&self.last_sent)?;
        self.queue(&ClientMessage::sync(&bytes));
        self.last_sent = version;
        Ok(true)
    }

    /// Apply a channel event to the document.
    pub fn handle_event(&mut self, event: &SyncEvent, doc: &mut ReplicatedDocument) {
        match event {
            SyncEvent::Connected => log::info!("replication channel connected"),
            SyncEvent::Disconnected => {
                log::info!("replication channel disconnected");
                self.synchronized = false;
                self.peers.clear();
            }
            SyncEvent::JoinedRoom {
                room,
                peer_count,
                snapshot,
            } => {
                self.room = Some(room.clone());
                self.peer_count = *peer_count;
                self.last_sent = VersionVector::default();
                if let Some(bytes) = snapshot {
                    match doc.import(bytes) {
                        // Everything in the room's state is already on the relay.
                        Ok(()) => match ReplicatedDocument::from_snapshot(bytes) {
                            Ok(room_state) => self.last_sent = room_state.version(),
                            Err(e) => log::debug!("could not read room version: {e}"),
                        },
                        Err(e) => log::warn!("failed to apply room snapshot: {e}"),
                    }
                }
                self.synchronized = true;
                log::info!("joined room '{room}' with {peer_count} peer(s)");
                if let Err(e) = self.flush_local(doc) {
                    log::warn!("failed to export local changes: {e}");
                }
            }
            SyncEvent::PeerJoined { peer_id } => {
                self.peer_count += 1;
                log::info!("peer {peer_id} joined");
            }
            SyncEvent::PeerLeft { peer_id } => {
                self.peer_count = self.peer_count.saturating_sub(1);
                self.peers.remove(peer_id);
                log::info!("peer {peer_id} left");
            }
            SyncEvent::SyncReceived { from, data } => {
                // Flush first so the post-import version only adds remote ops.
                if let Err(e) = self.flush_local(doc) {
                    log::warn!("failed to export local changes: {e}");
                }
                match doc.import(data) {
                    Ok(()) => {
                        if self.synchronized {
                            self.last_sent = doc.version();
                        }
                    }
                    Err(e) => log::warn!("failed to apply update from {from}: {e}"),
                }
            }
            SyncEvent::AwarenessReceived {
                from,
                peer_id,
                state,
            } => {
                let peer = self.peers.entry(from.clone()).or_default();
                peer.peer_id = *peer_id;
                peer.cursor = state.cursor.map(|c| Point::new(c.x, c.y));
                if state.user.is_some() {
                    peer.user = state.user.clone();
                }
            }
            SyncEvent::Error { message } => log::warn!("relay error: {message}"),
        }
    }

    /// Parse a relay text frame and apply it.
    pub fn handle_message(
        &mut self,
        json: &str,
        doc: &mut ReplicatedDocument,
    ) -> SyncResult<SyncEvent> {
        let event = parse_server_message(json)?;
        self.handle_event(&event, doc);
        Ok(event)
    }

    // --- Awareness ---

    pub fn set_cursor(&mut self, position: Point) {
        self.awareness.cursor = Some(CursorPosition {
            x: position.x,
            y: position.y,
        });
        self.queue_awareness();
    }

    pub fn clear_cursor(&mut self) {
        self.awareness.cursor = None;
        self.queue_awareness();
    }

    pub fn set_user_info(&mut self, name: String, color: String) {
        self.awareness.user = Some(UserInfo { name, color });
        self.queue_awareness();
    }

    pub fn awareness(&self) -> &AwarenessState {
        &self.awareness
    }

    /// Other participants by relay-assigned id.
    pub fn remote_peers(&self) -> impl Iterator<Item = (&str, &RemotePeer)> {
        self.peers.iter().map(|(id, peer)| (id.as_str(), peer))
    }

    fn queue_awareness(&mut self) {
        if self.synchronized {
            self.queue(&ClientMessage::Awareness {
                peer_id: self.peer_id,
                state: self.awareness.clone(),
            });
        }
    }
}
