//! Peer-facing listener: accepts mesh connections from other servers.

use crate::context::MeshContext;
use crate::link::{run_writer, LinkCommand};
use crate::router;
use futures_util::StreamExt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Accept peer connections until the listener fails.
///
/// Each connection gets a writer task (for query responses going back on the
/// same socket) and a read loop feeding the namespace router. A failure
/// closes only that connection.
pub async fn run_peer_server(ctx: Arc<MeshContext>, listener: TcpListener) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "peer listener started");
    loop {
        let (stream, remote) = listener.accept().await?;
        debug!(%remote, "peer connection accepted");
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            handle_peer_connection(ctx, stream).await;
        });
    }
}

async fn handle_peer_connection(ctx: Arc<MeshContext>, stream: TcpStream) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            warn!(%error, "peer websocket handshake failed");
            return;
        }
    };
    let (sink, mut source) = ws.split();

    let (reply, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(run_writer(sink, rx, Arc::new(AtomicBool::new(true))));

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Binary(bytes)) => router::dispatch(&ctx, &bytes, &reply).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                debug!(%error, "peer connection error");
                break;
            }
        }
    }

    let _ = reply.send(LinkCommand::Close);
    writer.abort();
}
