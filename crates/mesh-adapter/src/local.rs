//! Local Messaging Layer contract and an in-memory implementation.

use async_trait::async_trait;
use mesh_core::{BroadcastOptions, Packet, Room, SocketId};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// The room/messaging primitive each server already has. All effects are
/// local to the calling process; the mesh adapter makes them cluster-wide.
#[async_trait]
pub trait LocalAdapter: Send + Sync {
    /// Deliver a packet to matching locally connected sockets.
    async fn broadcast_local(&self, packet: Packet, opts: &BroadcastOptions);

    /// Ids of locally connected sockets matching the options.
    async fn fetch_local_sockets(&self, opts: &BroadcastOptions) -> Vec<SocketId>;

    /// Remove one socket from one room.
    async fn remove_from_room(&self, socket_id: &str, room: &str);

    /// Members of any of the given rooms.
    async fn sockets_in_rooms(&self, rooms: &HashSet<Room>) -> HashSet<SocketId>;

    /// Rooms a socket belongs to.
    async fn rooms_of_socket(&self, socket_id: &str) -> HashSet<Room>;

    /// Add matching sockets to rooms.
    async fn add_to_rooms(&self, opts: &BroadcastOptions, rooms: &[Room]);

    /// Remove matching sockets from rooms.
    async fn remove_from_rooms(&self, opts: &BroadcastOptions, rooms: &[Room]);

    /// Force-disconnect matching sockets, optionally closing the underlying
    /// connection.
    async fn disconnect_matching(&self, opts: &BroadcastOptions, close: bool);

    /// Delivery sink for custom server-to-server events.
    async fn handle_server_side_emit(&self, packet: Packet) {
        let _ = packet;
    }
}

#[derive(Default)]
struct MemoryState {
    /// Connected sockets and the rooms they joined.
    sockets: HashMap<SocketId, HashSet<Room>>,
    delivered: Vec<(Packet, BroadcastOptions)>,
    emitted: Vec<Packet>,
    disconnected: Vec<(SocketId, bool)>,
}

impl MemoryState {
    /// Sockets selected by the options: everyone when `rooms` is empty,
    /// otherwise members of any target room; members of `except` rooms are
    /// always excluded.
    fn matching(&self, opts: &BroadcastOptions) -> Vec<SocketId> {
        let mut ids: Vec<SocketId> = self
            .sockets
            .iter()
            .filter(|(_, joined)| {
                opts.rooms.is_empty() || joined.iter().any(|room| opts.rooms.contains(room))
            })
            .filter(|(_, joined)| !joined.iter().any(|room| opts.except.contains(room)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// In-memory [`LocalAdapter`], usable as a standalone room store and as the
/// local layer in tests.
#[derive(Default)]
pub struct MemoryLocalAdapter {
    state: Mutex<MemoryState>,
}

impl MemoryLocalAdapter {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected socket.
    pub async fn connect_socket(&self, socket_id: impl Into<SocketId>) {
        self.state
            .lock()
            .await
            .sockets
            .entry(socket_id.into())
            .or_default();
    }

    /// Join a connected socket to a room.
    pub async fn join(&self, socket_id: impl Into<SocketId>, room: impl Into<Room>) {
        self.state
            .lock()
            .await
            .sockets
            .entry(socket_id.into())
            .or_default()
            .insert(room.into());
    }

    /// Packets delivered locally so far.
    pub async fn delivered(&self) -> Vec<(Packet, BroadcastOptions)> {
        self.state.lock().await.delivered.clone()
    }

    /// Server-side events received so far.
    pub async fn emitted(&self) -> Vec<Packet> {
        self.state.lock().await.emitted.clone()
    }

    /// Sockets force-disconnected so far, with their close flag.
    pub async fn disconnected(&self) -> Vec<(SocketId, bool)> {
        self.state.lock().await.disconnected.clone()
    }
}

#[async_trait]
impl LocalAdapter for MemoryLocalAdapter {
    async fn broadcast_local(&self, packet: Packet, opts: &BroadcastOptions) {
        self.state.lock().await.delivered.push((packet, opts.clone()));
    }

    async fn fetch_local_sockets(&self, opts: &BroadcastOptions) -> Vec<SocketId> {
        self.state.lock().await.matching(opts)
    }

    async fn remove_from_room(&self, socket_id: &str, room: &str) {
        if let Some(joined) = self.state.lock().await.sockets.get_mut(socket_id) {
            joined.remove(room);
        }
    }

    async fn sockets_in_rooms(&self, rooms: &HashSet<Room>) -> HashSet<SocketId> {
        self.state
            .lock()
            .await
            .sockets
            .iter()
            .filter(|(_, joined)| joined.iter().any(|room| rooms.contains(room)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn rooms_of_socket(&self, socket_id: &str) -> HashSet<Room> {
        self.state
            .lock()
            .await
            .sockets
            .get(socket_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn add_to_rooms(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        let mut state = self.state.lock().await;
        for socket_id in state.matching(opts) {
            if let Some(joined) = state.sockets.get_mut(&socket_id) {
                joined.extend(rooms.iter().cloned());
            }
        }
    }

    async fn remove_from_rooms(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        let mut state = self.state.lock().await;
        for socket_id in state.matching(opts) {
            if let Some(joined) = state.sockets.get_mut(&socket_id) {
                for room in rooms {
                    joined.remove(room);
                }
            }
        }
    }

    async fn disconnect_matching(&self, opts: &BroadcastOptions, close: bool) {
        let mut state = self.state.lock().await;
        for socket_id in state.matching(opts) {
            state.sockets.remove(&socket_id);
            state.disconnected.push((socket_id, close));
        }
    }

    async fn handle_server_side_emit(&self, packet: Packet) {
        self.state.lock().await.emitted.push(packet);
    }
}
