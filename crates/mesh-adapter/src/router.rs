//! Inbound envelope routing.
//!
//! Every frame received on a peer connection, dialed or accepted, passes
//! through [`dispatch`]. Responses are matched against the pending query
//! table; everything else is routed to the adapter registered for the
//! envelope's namespace and applied with local-marked options so it is never
//! re-propagated.

use crate::context::{MeshContext, QueryReply};
use crate::link::{FrameSink, LinkCommand};
use mesh_core::{codec, BroadcastOptions, MeshMessage};
use std::sync::Arc;
use tracing::warn;

/// Handle one inbound frame. `reply` writes back on the connection the frame
/// arrived on; only request envelopes use it.
pub async fn dispatch(ctx: &Arc<MeshContext>, bytes: &[u8], reply: &FrameSink) {
    let message = match codec::decode_mesh(bytes) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, "malformed mesh envelope, dropped");
            return;
        }
    };

    // Responses resolve against the process-wide pending table; no namespace
    // lookup is involved.
    match message {
        MeshMessage::FetchSocketsResponse {
            request_id,
            server_id,
            sockets,
            ..
        }
        | MeshMessage::SocketsResponse {
            request_id,
            server_id,
            sockets,
            ..
        } => {
            ctx.resolve_contribution(request_id, server_id, QueryReply::Sockets(sockets))
                .await;
        }
        MeshMessage::SocketRoomsResponse {
            request_id,
            server_id,
            rooms,
            ..
        } => {
            ctx.resolve_contribution(request_id, server_id, QueryReply::Rooms(rooms))
                .await;
        }
        other => {
            let Some(adapter) = ctx.adapter(other.nsp()).await else {
                warn!(nsp = other.nsp(), "no adapter for namespace, dropped");
                return;
            };
            handle_request(ctx, &adapter, other, reply).await;
        }
    }
}

async fn handle_request(
    ctx: &Arc<MeshContext>,
    adapter: &crate::adapter::MeshAdapter,
    message: MeshMessage,
    reply: &FrameSink,
) {
    match message {
        MeshMessage::Broadcast { packet, opts, nsp: _ } => {
            let opts = BroadcastOptions::from(opts).into_local();
            if let Err(error) = adapter.broadcast(packet, &opts).await {
                warn!(%error, "inbound broadcast failed");
            }
        }
        MeshMessage::FetchSockets {
            request_id,
            opts,
            nsp,
            ..
        } => {
            let opts = BroadcastOptions::from(opts).into_local();
            let sockets = adapter.local().fetch_local_sockets(&opts).await;
            let response = MeshMessage::FetchSocketsResponse {
                request_id,
                server_id: ctx.server_id,
                sockets,
                nsp,
            };
            send_reply(reply, &response, opts.flags.compress);
        }
        MeshMessage::Sockets {
            request_id, rooms, nsp, ..
        } => {
            let members = adapter
                .local()
                .sockets_in_rooms(&rooms.into_iter().collect())
                .await;
            let mut sockets: Vec<_> = members.into_iter().collect();
            sockets.sort();
            let response = MeshMessage::SocketsResponse {
                request_id,
                server_id: ctx.server_id,
                sockets,
                nsp,
            };
            send_reply(reply, &response, false);
        }
        MeshMessage::SocketRooms {
            request_id,
            socket_id,
            nsp,
            ..
        } => {
            let joined = adapter.local().rooms_of_socket(&socket_id).await;
            let mut rooms: Vec<_> = joined.into_iter().collect();
            rooms.sort();
            let response = MeshMessage::SocketRoomsResponse {
                request_id,
                server_id: ctx.server_id,
                rooms,
                nsp,
            };
            send_reply(reply, &response, false);
        }
        MeshMessage::DelSocketRoom {
            socket_id, room, ..
        } => {
            let opts = BroadcastOptions::default().into_local();
            if let Err(error) = adapter.del(&socket_id, &room, &opts).await {
                warn!(%error, "inbound del failed");
            }
        }
        MeshMessage::AddSockets { rooms, opts, .. } => {
            let opts = BroadcastOptions::from(opts).into_local();
            if let Err(error) = adapter.add_sockets(&opts, rooms).await {
                warn!(%error, "inbound add-sockets failed");
            }
        }
        MeshMessage::DelSockets { rooms, opts, .. } => {
            let opts = BroadcastOptions::from(opts).into_local();
            if let Err(error) = adapter.del_sockets(&opts, rooms).await {
                warn!(%error, "inbound del-sockets failed");
            }
        }
        MeshMessage::DisconnectSockets { opts, close, .. } => {
            let opts = BroadcastOptions::from(opts).into_local();
            if let Err(error) = adapter.disconnect_sockets(&opts, close).await {
                warn!(%error, "inbound disconnect-sockets failed");
            }
        }
        MeshMessage::ServerSideEmit { packet, .. } => {
            adapter.local().handle_server_side_emit(packet).await;
        }
        MeshMessage::FetchSocketsResponse { .. }
        | MeshMessage::SocketsResponse { .. }
        | MeshMessage::SocketRoomsResponse { .. } => {
            // Handled in dispatch before the namespace lookup.
        }
    }
}

fn send_reply(reply: &FrameSink, response: &MeshMessage, compress: bool) {
    match codec::encode_mesh(response, compress) {
        Ok(bytes) => {
            if reply.send(LinkCommand::Frame(bytes)).is_err() {
                warn!("reply connection gone, response dropped");
            }
        }
        Err(error) => warn!(%error, "failed to encode response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MeshAdapter;
    use crate::local::{LocalAdapter, MemoryLocalAdapter};
    use crate::testutil::add_fake_peer;
    use mesh_core::{MeshConfig, Packet, RequestId, ServerId};
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn setup() -> (Arc<MeshContext>, Arc<MemoryLocalAdapter>) {
        let ctx = MeshContext::new(MeshConfig::default());
        let local = Arc::new(MemoryLocalAdapter::new());
        MeshAdapter::attach(&ctx, "/", local.clone() as Arc<dyn LocalAdapter>).await;
        (ctx, local)
    }

    fn reply_channel() -> (FrameSink, UnboundedReceiver<LinkCommand>) {
        mpsc::unbounded_channel()
    }

    fn frame(message: &MeshMessage) -> Vec<u8> {
        codec::encode_mesh(message, false).expect("encode")
    }

    fn packet(event: &str) -> Packet {
        Packet {
            kind: 2,
            data: vec![event.to_string()],
            nsp: "/".to_string(),
        }
    }

    fn wire_opts() -> mesh_core::WireOptions {
        mesh_core::WireOptions::from(&mesh_core::BroadcastOptions::default())
    }

    #[tokio::test]
    async fn inbound_broadcast_applies_locally_without_refanning() {
        let (ctx, local) = setup().await;
        let link = add_fake_peer(&ctx, ServerId::generate()).await;
        let (reply, _rx) = reply_channel();

        let envelope = frame(&MeshMessage::Broadcast {
            packet: packet("hello"),
            opts: wire_opts(),
            nsp: "/".to_string(),
        });
        dispatch(&ctx, &envelope, &reply).await;

        let delivered = local.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0.data, vec!["hello".to_string()]);
        // Applied with the local marker, so nothing went back out.
        assert!(delivered[0].1.flags.local);
        assert!(link.frames().is_empty());
    }

    #[tokio::test]
    async fn compressed_broadcast_is_accepted() {
        let (ctx, local) = setup().await;
        let (reply, _rx) = reply_channel();

        let envelope = codec::encode_mesh(
            &MeshMessage::Broadcast {
                packet: packet("squeezed"),
                opts: wire_opts(),
                nsp: "/".to_string(),
            },
            true,
        )
        .expect("encode");
        dispatch(&ctx, &envelope, &reply).await;

        assert_eq!(local.delivered().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_namespace_envelope_is_dropped() {
        let (ctx, local) = setup().await;
        let (reply, mut rx) = reply_channel();

        let envelope = frame(&MeshMessage::Broadcast {
            packet: packet("lost"),
            opts: wire_opts(),
            nsp: "/nowhere".to_string(),
        });
        dispatch(&ctx, &envelope, &reply).await;

        assert!(local.delivered().await.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped() {
        let (ctx, local) = setup().await;
        let (reply, mut rx) = reply_channel();

        dispatch(&ctx, b"not an envelope", &reply).await;

        assert!(local.delivered().await.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fetch_sockets_request_replies_on_the_same_connection() {
        let (ctx, local) = setup().await;
        local.connect_socket("a").await;
        let (reply, mut rx) = reply_channel();

        let request_id = RequestId::generate();
        let envelope = frame(&MeshMessage::FetchSockets {
            request_id,
            server_id: ServerId::generate(),
            opts: wire_opts(),
            nsp: "/".to_string(),
        });
        dispatch(&ctx, &envelope, &reply).await;

        let Some(LinkCommand::Frame(bytes)) = rx.recv().await else {
            panic!("no response frame");
        };
        match codec::decode_mesh(&bytes).expect("decode") {
            MeshMessage::FetchSocketsResponse {
                request_id: echoed,
                server_id,
                sockets,
                nsp,
            } => {
                assert_eq!(echoed, request_id);
                assert_eq!(server_id, ctx.server_id);
                assert_eq!(sockets, vec!["a".to_string()]);
                assert_eq!(nsp, "/");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sockets_request_replies_with_sorted_members() {
        let (ctx, local) = setup().await;
        local.join("b", "news").await;
        local.join("a", "news").await;
        local.join("c", "sport").await;
        let (reply, mut rx) = reply_channel();

        let request_id = RequestId::generate();
        let envelope = frame(&MeshMessage::Sockets {
            request_id,
            server_id: ServerId::generate(),
            rooms: vec!["news".to_string()],
            nsp: "/".to_string(),
        });
        dispatch(&ctx, &envelope, &reply).await;

        let Some(LinkCommand::Frame(bytes)) = rx.recv().await else {
            panic!("no response frame");
        };
        match codec::decode_mesh(&bytes).expect("decode") {
            MeshMessage::SocketsResponse { sockets, .. } => {
                assert_eq!(sockets, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn socket_rooms_request_replies_with_memberships() {
        let (ctx, local) = setup().await;
        local.join("a", "sport").await;
        local.join("a", "news").await;
        let (reply, mut rx) = reply_channel();

        let envelope = frame(&MeshMessage::SocketRooms {
            request_id: RequestId::generate(),
            server_id: ServerId::generate(),
            socket_id: "a".to_string(),
            nsp: "/".to_string(),
        });
        dispatch(&ctx, &envelope, &reply).await;

        let Some(LinkCommand::Frame(bytes)) = rx.recv().await else {
            panic!("no response frame");
        };
        match codec::decode_mesh(&bytes).expect("decode") {
            MeshMessage::SocketRoomsResponse { rooms, .. } => {
                assert_eq!(rooms, vec!["news".to_string(), "sport".to_string()]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_response_is_dropped() {
        let (ctx, _local) = setup().await;
        let (reply, mut rx) = reply_channel();

        let envelope = frame(&MeshMessage::FetchSocketsResponse {
            request_id: RequestId::generate(),
            server_id: ServerId::generate(),
            sockets: vec!["ghost".to_string()],
            nsp: "/".to_string(),
        });
        dispatch(&ctx, &envelope, &reply).await;

        assert_eq!(ctx.pending_count().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn inbound_disconnect_applies_without_refanning() {
        let (ctx, local) = setup().await;
        local.join("a", "doomed").await;
        let link = add_fake_peer(&ctx, ServerId::generate()).await;
        let (reply, _rx) = reply_channel();

        let opts =
            mesh_core::WireOptions::from(&mesh_core::BroadcastOptions::to_rooms(["doomed".to_string()]));
        let envelope = frame(&MeshMessage::DisconnectSockets {
            opts,
            close: true,
            server_id: ServerId::generate(),
            nsp: "/".to_string(),
        });
        dispatch(&ctx, &envelope, &reply).await;

        assert_eq!(local.disconnected().await, vec![("a".to_string(), true)]);
        assert!(link.frames().is_empty());
    }

    #[tokio::test]
    async fn inbound_server_side_emit_reaches_the_delivery_sink() {
        let (ctx, local) = setup().await;
        let (reply, _rx) = reply_channel();

        let envelope = frame(&MeshMessage::ServerSideEmit {
            packet: packet("custom"),
            server_id: ServerId::generate(),
            nsp: "/".to_string(),
        });
        dispatch(&ctx, &envelope, &reply).await;

        let emitted = local.emitted().await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].data, vec!["custom".to_string()]);
    }
}
