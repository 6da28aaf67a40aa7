//! Protocol envelopes for discovery and mesh traffic.
//!
//! Both unions are exhaustive tagged enums: decoding an unrecognized tag is a
//! typed codec error, never a silently ignored property probe.

use crate::ids::{RequestId, Room, ServerId, SocketId};
use crate::options::WireOptions;
use serde::{Deserialize, Serialize};

/// An application packet relayed between servers.
///
/// The payload is opaque to the coordination layer; only the namespace is
/// inspected for routing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Packet kind as defined by the local messaging layer.
    pub kind: u16,
    /// Event payload segments.
    pub data: Vec<String>,
    /// Namespace the packet belongs to.
    pub nsp: String,
}

/// One registered server as listed in a discovery snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// The server's self-assigned id.
    pub server_id: ServerId,
    /// Externally reachable peer-link address, e.g. `ws://host:4000`.
    pub address: String,
}

/// Envelopes exchanged with the discovery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryMessage {
    /// A server announcing itself. Sent immediately after every (re)connect.
    Register {
        /// Registering server.
        server_id: ServerId,
        /// Its peer-link address.
        address: String,
    },
    /// Full membership snapshot, rebroadcast on every change.
    Update {
        /// The complete current server list, never a delta.
        servers: Vec<ServerEntry>,
    },
}

/// Envelopes exchanged between server nodes over peer links.
///
/// Every variant carries the namespace discriminator used by the router;
/// query variants carry a request id and the sender's server id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshMessage {
    /// Deliver a packet to matching local sockets.
    Broadcast {
        packet: Packet,
        opts: WireOptions,
        nsp: String,
    },
    /// Fan-out request for all locally connected sockets.
    FetchSockets {
        request_id: RequestId,
        server_id: ServerId,
        opts: WireOptions,
        nsp: String,
    },
    /// Per-peer reply to [`MeshMessage::FetchSockets`].
    FetchSocketsResponse {
        request_id: RequestId,
        server_id: ServerId,
        sockets: Vec<SocketId>,
        nsp: String,
    },
    /// Fan-out request for the members of a set of rooms.
    Sockets {
        request_id: RequestId,
        server_id: ServerId,
        rooms: Vec<Room>,
        nsp: String,
    },
    /// Per-peer reply to [`MeshMessage::Sockets`].
    SocketsResponse {
        request_id: RequestId,
        server_id: ServerId,
        sockets: Vec<SocketId>,
        nsp: String,
    },
    /// Fan-out request for the rooms one socket belongs to.
    SocketRooms {
        request_id: RequestId,
        server_id: ServerId,
        socket_id: SocketId,
        nsp: String,
    },
    /// Per-peer reply to [`MeshMessage::SocketRooms`].
    SocketRoomsResponse {
        request_id: RequestId,
        server_id: ServerId,
        rooms: Vec<Room>,
        nsp: String,
    },
    /// Remove one socket from one room on every server.
    DelSocketRoom {
        socket_id: SocketId,
        room: Room,
        server_id: ServerId,
        nsp: String,
    },
    /// Add matching sockets to rooms on every server.
    AddSockets {
        rooms: Vec<Room>,
        opts: WireOptions,
        server_id: ServerId,
        nsp: String,
    },
    /// Remove matching sockets from rooms on every server.
    DelSockets {
        rooms: Vec<Room>,
        opts: WireOptions,
        server_id: ServerId,
        nsp: String,
    },
    /// Force-disconnect matching sockets on every server.
    DisconnectSockets {
        opts: WireOptions,
        close: bool,
        server_id: ServerId,
        nsp: String,
    },
    /// Custom server-to-server event, delivered to the application layer.
    ServerSideEmit {
        packet: Packet,
        server_id: ServerId,
        nsp: String,
    },
}

impl MeshMessage {
    /// The namespace this envelope is routed to.
    pub fn nsp(&self) -> &str {
        match self {
            Self::Broadcast { nsp, .. }
            | Self::FetchSockets { nsp, .. }
            | Self::FetchSocketsResponse { nsp, .. }
            | Self::Sockets { nsp, .. }
            | Self::SocketsResponse { nsp, .. }
            | Self::SocketRooms { nsp, .. }
            | Self::SocketRoomsResponse { nsp, .. }
            | Self::DelSocketRoom { nsp, .. }
            | Self::AddSockets { nsp, .. }
            | Self::DelSockets { nsp, .. }
            | Self::DisconnectSockets { nsp, .. }
            | Self::ServerSideEmit { nsp, .. } => nsp,
        }
    }
}
