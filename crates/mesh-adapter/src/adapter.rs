//! Namespace-scoped propagation and distributed query engine.

use crate::context::{MeshContext, PendingQuery, QueryAccumulator};
use crate::error::MeshError;
use crate::local::LocalAdapter;
use mesh_core::{
    codec, BroadcastOptions, MeshMessage, Packet, RequestId, Room, SocketId, WireOptions,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Cluster-wide view of one namespace.
///
/// Every mutation is applied to the local messaging layer first,
/// unconditionally, then forwarded to all open peer links unless the caller
/// marked it local-only or no peers are known. Outbound envelopes carry the
/// local marker so receivers never re-propagate them.
pub struct MeshAdapter {
    ctx: Arc<MeshContext>,
    nsp: String,
    local: Arc<dyn LocalAdapter>,
}

impl MeshAdapter {
    /// Bind a namespace to the shared mesh context and register it for
    /// inbound routing.
    pub async fn attach(
        ctx: &Arc<MeshContext>,
        nsp: impl Into<String>,
        local: Arc<dyn LocalAdapter>,
    ) -> Arc<Self> {
        let nsp = nsp.into();
        let adapter = Arc::new(Self {
            ctx: Arc::clone(ctx),
            nsp: nsp.clone(),
            local,
        });
        ctx.register_namespace(nsp, Arc::clone(&adapter)).await;
        adapter
    }

    /// The namespace this adapter serves.
    pub fn nsp(&self) -> &str {
        &self.nsp
    }

    /// The local messaging layer behind this namespace.
    pub fn local(&self) -> &Arc<dyn LocalAdapter> {
        &self.local
    }

    /// Unregister the namespace. Inbound envelopes for it are dropped from
    /// then on.
    pub async fn close(&self) {
        self.ctx.unregister_namespace(&self.nsp).await;
    }

    /// Known servers including this one.
    pub async fn server_count(&self) -> usize {
        self.ctx.peer_count().await + 1
    }

    /// Broadcast a packet cluster-wide.
    ///
    /// Volatile broadcasts are not forwarded at all while this server has no
    /// locally connected sockets.
    pub async fn broadcast(&self, packet: Packet, opts: &BroadcastOptions) -> Result<(), MeshError> {
        self.local.broadcast_local(packet.clone(), opts).await;

        if opts.flags.local || self.ctx.peer_count().await == 0 {
            return Ok(());
        }
        if opts.flags.volatile
            && self
                .local
                .fetch_local_sockets(&BroadcastOptions::default())
                .await
                .is_empty()
        {
            debug!(nsp = %self.nsp, "volatile broadcast with no local sockets, not forwarded");
            return Ok(());
        }

        let message = MeshMessage::Broadcast {
            packet,
            opts: WireOptions::from(&opts.into_local()),
            nsp: self.nsp.clone(),
        };
        self.fan_out(&message, opts.flags.compress).await
    }

    /// Remove one socket from one room cluster-wide.
    pub async fn del(
        &self,
        socket_id: &str,
        room: &str,
        opts: &BroadcastOptions,
    ) -> Result<(), MeshError> {
        self.local.remove_from_room(socket_id, room).await;

        if opts.flags.local || self.ctx.peer_count().await == 0 {
            return Ok(());
        }
        let message = MeshMessage::DelSocketRoom {
            socket_id: socket_id.to_string(),
            room: room.to_string(),
            server_id: self.ctx.server_id,
            nsp: self.nsp.clone(),
        };
        self.fan_out(&message, opts.flags.compress).await
    }

    /// Add matching sockets to rooms cluster-wide.
    pub async fn add_sockets(
        &self,
        opts: &BroadcastOptions,
        rooms: Vec<Room>,
    ) -> Result<(), MeshError> {
        self.local.add_to_rooms(opts, &rooms).await;

        if opts.flags.local || self.ctx.peer_count().await == 0 {
            return Ok(());
        }
        let message = MeshMessage::AddSockets {
            rooms,
            opts: WireOptions::from(&opts.into_local()),
            server_id: self.ctx.server_id,
            nsp: self.nsp.clone(),
        };
        self.fan_out(&message, opts.flags.compress).await
    }

    /// Remove matching sockets from rooms cluster-wide.
    pub async fn del_sockets(
        &self,
        opts: &BroadcastOptions,
        rooms: Vec<Room>,
    ) -> Result<(), MeshError> {
        self.local.remove_from_rooms(opts, &rooms).await;

        if opts.flags.local || self.ctx.peer_count().await == 0 {
            return Ok(());
        }
        let message = MeshMessage::DelSockets {
            rooms,
            opts: WireOptions::from(&opts.into_local()),
            server_id: self.ctx.server_id,
            nsp: self.nsp.clone(),
        };
        self.fan_out(&message, opts.flags.compress).await
    }

    /// Force-disconnect matching sockets cluster-wide.
    pub async fn disconnect_sockets(
        &self,
        opts: &BroadcastOptions,
        close: bool,
    ) -> Result<(), MeshError> {
        self.local.disconnect_matching(opts, close).await;

        if opts.flags.local || self.ctx.peer_count().await == 0 {
            return Ok(());
        }
        let message = MeshMessage::DisconnectSockets {
            opts: WireOptions::from(&opts.into_local()),
            close,
            server_id: self.ctx.server_id,
            nsp: self.nsp.clone(),
        };
        self.fan_out(&message, opts.flags.compress).await
    }

    /// Emit a custom event to every other server in the cluster.
    pub async fn server_side_emit(&self, packet: Packet) -> Result<(), MeshError> {
        if self.ctx.peer_count().await == 0 {
            return Ok(());
        }
        let message = MeshMessage::ServerSideEmit {
            packet,
            server_id: self.ctx.server_id,
            nsp: self.nsp.clone(),
        };
        self.fan_out(&message, false).await
    }

    /// Fetch all connected socket ids cluster-wide.
    ///
    /// The result is the concatenation of the local list and each peer's
    /// contribution; per-server multiplicity is preserved, so there is no
    /// de-duplication across contributions.
    pub async fn fetch_sockets(&self, opts: &BroadcastOptions) -> Result<Vec<SocketId>, MeshError> {
        let local = self.local.fetch_local_sockets(opts).await;
        if opts.flags.local || self.ctx.peer_count().await == 0 {
            return Ok(local);
        }

        let request_id = RequestId::generate();
        let message = MeshMessage::FetchSockets {
            request_id,
            server_id: self.ctx.server_id,
            opts: WireOptions::from(&opts.into_local()),
            nsp: self.nsp.clone(),
        };
        match self
            .fan_out_query(request_id, QueryAccumulator::SocketList(local), &message, opts)
            .await?
        {
            QueryAccumulator::SocketList(sockets) => Ok(sockets),
            _ => Err(MeshError::QueryAborted),
        }
    }

    /// Fetch member ids of a set of rooms cluster-wide. Set union makes the
    /// merge idempotent against repeated contributions.
    pub async fn sockets(
        &self,
        rooms: HashSet<Room>,
        opts: &BroadcastOptions,
    ) -> Result<HashSet<SocketId>, MeshError> {
        let local = self.local.sockets_in_rooms(&rooms).await;
        if opts.flags.local || self.ctx.peer_count().await == 0 {
            return Ok(local);
        }

        let request_id = RequestId::generate();
        let mut room_list: Vec<Room> = rooms.into_iter().collect();
        room_list.sort();
        let message = MeshMessage::Sockets {
            request_id,
            server_id: self.ctx.server_id,
            rooms: room_list,
            nsp: self.nsp.clone(),
        };
        match self
            .fan_out_query(request_id, QueryAccumulator::SocketSet(local), &message, opts)
            .await?
        {
            QueryAccumulator::SocketSet(sockets) => Ok(sockets),
            _ => Err(MeshError::QueryAborted),
        }
    }

    /// Fetch the rooms a socket belongs to, cluster-wide.
    pub async fn socket_rooms(
        &self,
        socket_id: &str,
        opts: &BroadcastOptions,
    ) -> Result<HashSet<Room>, MeshError> {
        let local = self.local.rooms_of_socket(socket_id).await;
        if opts.flags.local || self.ctx.peer_count().await == 0 {
            return Ok(local);
        }

        let request_id = RequestId::generate();
        let message = MeshMessage::SocketRooms {
            request_id,
            server_id: self.ctx.server_id,
            socket_id: socket_id.to_string(),
            nsp: self.nsp.clone(),
        };
        match self
            .fan_out_query(request_id, QueryAccumulator::RoomSet(local), &message, opts)
            .await?
        {
            QueryAccumulator::RoomSet(rooms) => Ok(rooms),
            _ => Err(MeshError::QueryAborted),
        }
    }

    /// Send an envelope to every open peer link. A failed send evicts that
    /// peer immediately and delivery to the remaining peers continues.
    async fn fan_out(&self, message: &MeshMessage, compress: bool) -> Result<(), MeshError> {
        let frame = codec::encode_mesh(message, compress)?;
        for (server_id, link) in self.ctx.open_links().await {
            if let Err(error) = link.send(frame.clone()) {
                warn!(%server_id, %error, "peer send failed, evicting");
                self.ctx.evict_peer(server_id).await;
            }
        }
        Ok(())
    }

    /// Register a pending query, fan the request out, and await resolution by
    /// quorum or deadline, whichever happens first.
    async fn fan_out_query(
        &self,
        request_id: RequestId,
        seed: QueryAccumulator,
        message: &MeshMessage,
        opts: &BroadcastOptions,
    ) -> Result<QueryAccumulator, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.ctx
            .insert_pending(
                request_id,
                PendingQuery {
                    accumulator: seed,
                    responded: HashSet::new(),
                    tx,
                },
            )
            .await;

        if let Err(error) = self.fan_out(message, opts.flags.compress).await {
            self.ctx.resolve_deadline(request_id).await;
            return Err(error);
        }

        let deadline = opts
            .flags
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(self.ctx.config.request_timeout);
        let timer_ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            timer_ctx.resolve_deadline(request_id).await;
        });

        rx.await.map_err(|_| MeshError::QueryAborted)
    }
}
