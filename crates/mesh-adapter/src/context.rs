//! Per-process mesh state, passed by reference to every namespace instance.

use crate::link::PeerLink;
use mesh_core::{MeshConfig, RequestId, Room, ServerId, SocketId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

/// One known peer server: its address and the link used to reach it.
///
/// Owned exclusively by the link manager; propagation and query code read the
/// link but never mutate the record.
pub struct PeerRecord {
    /// Externally reachable peer-link address.
    pub address: String,
    /// Open (or opening) connection to the peer.
    pub link: Arc<dyn PeerLink>,
}

/// Running tally of one fan-out query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAccumulator {
    /// Ordered all-sockets query: plain concatenation, no de-duplication.
    SocketList(Vec<SocketId>),
    /// Room-membership query: set union, idempotent under repeats.
    SocketSet(HashSet<SocketId>),
    /// Rooms-of-socket query: set union.
    RoomSet(HashSet<Room>),
}

/// One peer's contribution to a pending query.
#[derive(Debug)]
pub enum QueryReply {
    /// Socket ids from a fetch-sockets or sockets request.
    Sockets(Vec<SocketId>),
    /// Room names from a socket-rooms request.
    Rooms(Vec<Room>),
}

impl QueryAccumulator {
    fn merge(&mut self, reply: QueryReply) {
        match (self, reply) {
            (Self::SocketList(list), QueryReply::Sockets(sockets)) => list.extend(sockets),
            (Self::SocketSet(set), QueryReply::Sockets(sockets)) => set.extend(sockets),
            (Self::RoomSet(set), QueryReply::Rooms(rooms)) => set.extend(rooms),
            (_, reply) => warn!(?reply, "mismatched query contribution, dropped"),
        }
    }
}

/// A fan-out query awaiting peer responses.
///
/// Resolves exactly once: quorum (responses from every currently known peer)
/// and the deadline race to take the entry out of the table; whichever wins
/// sends the accumulator. A contribution arriving afterwards finds no entry
/// and is dropped.
pub(crate) struct PendingQuery {
    pub(crate) accumulator: QueryAccumulator,
    pub(crate) responded: HashSet<ServerId>,
    pub(crate) tx: oneshot::Sender<QueryAccumulator>,
}

/// Per-process mesh state: membership table, pending queries, and namespace
/// registry. Constructed once per process and shared by reference with every
/// namespace-scoped adapter; there is no hidden global.
pub struct MeshContext {
    /// This server's id. Never present in its own peer table.
    pub server_id: ServerId,
    /// Process configuration.
    pub config: MeshConfig,
    peers: RwLock<HashMap<ServerId, PeerRecord>>,
    pending: Mutex<HashMap<RequestId, PendingQuery>>,
    namespaces: RwLock<HashMap<String, Arc<crate::adapter::MeshAdapter>>>,
}

impl MeshContext {
    /// Create the process context with a freshly generated server id.
    pub fn new(config: MeshConfig) -> Arc<Self> {
        let server_id = ServerId::generate();
        info!(%server_id, "mesh context created");
        Arc::new(Self {
            server_id,
            config,
            peers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
        })
    }

    /// Number of currently known peers.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Addresses of currently known peers, for inspection.
    pub async fn peer_addresses(&self) -> HashMap<ServerId, String> {
        self.peers
            .read()
            .await
            .iter()
            .map(|(id, record)| (*id, record.address.clone()))
            .collect()
    }

    /// Links that are currently open, for fan-out.
    pub async fn open_links(&self) -> Vec<(ServerId, Arc<dyn PeerLink>)> {
        self.peers
            .read()
            .await
            .iter()
            .filter(|(_, record)| record.link.is_open())
            .map(|(id, record)| (*id, Arc::clone(&record.link)))
            .collect()
    }

    /// Install or replace a peer record. Own id is refused; the membership
    /// table never contains the owning server.
    pub async fn insert_peer(&self, server_id: ServerId, record: PeerRecord) {
        if server_id == self.server_id {
            warn!(%server_id, "refusing to add self to peer table");
            return;
        }
        if let Some(previous) = self.peers.write().await.insert(server_id, record) {
            previous.link.close();
        }
    }

    /// Close and drop a peer. Used on snapshot removal and on send failure
    /// (optimistic eviction; the next discovery snapshot restores the peer).
    pub async fn evict_peer(&self, server_id: ServerId) -> bool {
        match self.peers.write().await.remove(&server_id) {
            Some(record) => {
                record.link.close();
                info!(%server_id, "peer evicted");
                true
            }
            None => false,
        }
    }

    /// Drop a peer only while it still holds the given link. A record already
    /// replaced by a newer connection is left alone.
    pub(crate) async fn remove_peer_if_link(&self, server_id: ServerId, link: &Arc<dyn PeerLink>) {
        let mut peers = self.peers.write().await;
        if let Some(record) = peers.get(&server_id) {
            if Arc::ptr_eq(&record.link, link) {
                peers.remove(&server_id);
                debug!(%server_id, "peer link closed, removed");
            }
        }
    }

    /// Register a namespace adapter for inbound routing.
    pub async fn register_namespace(&self, nsp: String, adapter: Arc<crate::adapter::MeshAdapter>) {
        self.namespaces.write().await.insert(nsp, adapter);
    }

    /// Remove a namespace adapter.
    pub async fn unregister_namespace(&self, nsp: &str) {
        self.namespaces.write().await.remove(nsp);
    }

    /// Adapter bound to a namespace, if registered.
    pub async fn adapter(&self, nsp: &str) -> Option<Arc<crate::adapter::MeshAdapter>> {
        self.namespaces.read().await.get(nsp).cloned()
    }

    pub(crate) async fn insert_pending(&self, request_id: RequestId, query: PendingQuery) {
        self.pending.lock().await.insert(request_id, query);
    }

    pub(crate) async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Merge one peer's contribution; resolve when the responded set covers
    /// the current peer table.
    pub(crate) async fn resolve_contribution(
        &self,
        request_id: RequestId,
        from: ServerId,
        reply: QueryReply,
    ) {
        let peer_count = self.peer_count().await;
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.get_mut(&request_id) else {
            debug!(%request_id, %from, "response for unknown request, dropped");
            return;
        };
        entry.accumulator.merge(reply);
        entry.responded.insert(from);
        if entry.responded.len() >= peer_count {
            if let Some(entry) = pending.remove(&request_id) {
                debug!(%request_id, "query resolved by quorum");
                let _ = entry.tx.send(entry.accumulator);
            }
        }
    }

    /// Resolve a query with its partial accumulation once the deadline fires.
    /// A no-op when quorum already resolved it.
    pub(crate) async fn resolve_deadline(&self, request_id: RequestId) {
        if let Some(entry) = self.pending.lock().await.remove(&request_id) {
            debug!(%request_id, responded = entry.responded.len(), "query deadline elapsed, resolving partial");
            let _ = entry.tx.send(entry.accumulator);
        }
    }
}
