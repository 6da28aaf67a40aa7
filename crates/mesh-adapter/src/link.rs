//! Peer links: the outbound half of a connection to another server node.

use crate::context::MeshContext;
use crate::error::MeshError;
use crate::router;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use mesh_core::ServerId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

/// Command consumed by a connection's writer task.
#[derive(Debug)]
pub enum LinkCommand {
    /// Write one binary frame.
    Frame(Vec<u8>),
    /// Send a close frame and stop writing.
    Close,
}

/// Outbound frame sink for one connection, shared by the link handle and by
/// the router when replying on the same connection.
pub type FrameSink = mpsc::UnboundedSender<LinkCommand>;

/// One direction of a peer connection: fire-and-forget frame delivery.
pub trait PeerLink: Send + Sync {
    /// Queue a frame for delivery. An error means the link is gone; the
    /// caller evicts the peer and moves on.
    fn send(&self, frame: Vec<u8>) -> Result<(), MeshError>;
    /// Whether the link is currently writable.
    fn is_open(&self) -> bool;
    /// Close the link.
    fn close(&self);
}

/// Dial seam for the link manager. Tests substitute a recording fake.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link to a peer and wire its inbound frames into the router.
    async fn open(
        &self,
        ctx: &Arc<MeshContext>,
        server_id: ServerId,
        address: &str,
    ) -> Result<Arc<dyn PeerLink>, MeshError>;
}

/// WebSocket-backed peer link fed through a writer task.
pub struct WsLink {
    tx: FrameSink,
    open: Arc<AtomicBool>,
}

impl PeerLink for WsLink {
    fn send(&self, frame: Vec<u8>) -> Result<(), MeshError> {
        if !self.is_open() {
            return Err(MeshError::LinkClosed);
        }
        self.tx.send(LinkCommand::Frame(frame)).map_err(|_| {
            self.open.store(false, Ordering::Relaxed);
            MeshError::LinkClosed
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        let _ = self.tx.send(LinkCommand::Close);
    }
}

/// Writer task body shared by dialed links and accepted connections.
pub(crate) async fn run_writer<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<LinkCommand>,
    open: Arc<AtomicBool>,
) where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    while let Some(command) = rx.recv().await {
        match command {
            LinkCommand::Frame(bytes) => {
                if let Err(error) = sink.send(Message::Binary(bytes)).await {
                    debug!(%error, "frame write failed");
                    break;
                }
            }
            LinkCommand::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    open.store(false, Ordering::Relaxed);
}

/// Dials peers over WebSocket.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        ctx: &Arc<MeshContext>,
        server_id: ServerId,
        address: &str,
    ) -> Result<Arc<dyn PeerLink>, MeshError> {
        let (ws, _) = tokio_tungstenite::connect_async(address)
            .await
            .map_err(|error| MeshError::Connect {
                address: address.to_string(),
                reason: error.to_string(),
            })?;
        let (sink, mut source) = ws.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let link: Arc<dyn PeerLink> = Arc::new(WsLink {
            tx: tx.clone(),
            open: Arc::clone(&open),
        });

        tokio::spawn(run_writer(sink, rx, Arc::clone(&open)));

        let reader_ctx = Arc::clone(ctx);
        let reader_link = Arc::clone(&link);
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Binary(bytes)) => {
                        router::dispatch(&reader_ctx, &bytes, &tx).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        debug!(%server_id, %error, "peer link read failed");
                        break;
                    }
                }
            }
            open.store(false, Ordering::Relaxed);
            reader_ctx.remove_peer_if_link(server_id, &reader_link).await;
        });

        Ok(link)
    }
}
