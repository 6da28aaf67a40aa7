//! WebSocket front end of the discovery registry.

use crate::registry::{ConnId, Registry};
use futures_util::{SinkExt, StreamExt};
use mesh_core::{codec, DiscoveryMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

struct State {
    registry: Registry,
    /// Outbound frame sink per live connection, registered or not.
    links: HashMap<ConnId, mpsc::UnboundedSender<Vec<u8>>>,
}

impl State {
    /// Send the full current snapshot to every connected server.
    ///
    /// A dead sink is logged and skipped; it never blocks delivery to the
    /// remaining servers.
    fn broadcast_snapshot(&self) {
        let update = DiscoveryMessage::Update {
            servers: self.registry.snapshot(),
        };
        let bytes = match codec::encode_discovery(&update) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "failed to encode membership snapshot");
                return;
            }
        };
        info!(servers = self.registry.len(), "broadcasting membership snapshot");
        for (conn, link) in &self.links {
            if link.send(bytes.clone()).is_err() {
                warn!(conn = conn.0, "failed to queue snapshot, connection gone");
            }
        }
    }
}

/// The discovery registry service.
///
/// Accepts WebSocket connections, handles `register` envelopes, and
/// rebroadcasts the complete membership snapshot on every change. No peer
/// authentication: any connecting party may register under any server id.
pub struct DiscoveryService {
    state: Arc<Mutex<State>>,
    next_conn: AtomicU64,
}

impl Default for DiscoveryService {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryService {
    /// Create a service with an empty registry.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                registry: Registry::new(),
                links: HashMap::new(),
            })),
            next_conn: AtomicU64::new(1),
        }
    }

    /// Accept and serve connections until the listener fails.
    pub async fn run(&self, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "discovery service listening");
        loop {
            let (stream, remote) = listener.accept().await?;
            let conn = ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed));
            debug!(conn = conn.0, %remote, "connection accepted");
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                handle_connection(state, conn, stream).await;
            });
        }
    }
}

async fn handle_connection(state: Arc<Mutex<State>>, conn: ConnId, stream: TcpStream) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            warn!(conn = conn.0, %error, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    state.lock().await.links.insert(conn, tx);

    let writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(error) = sink.send(Message::Binary(bytes)).await {
                debug!(%error, "snapshot write failed");
                break;
            }
        }
    });

    while let Some(message) = source.next().await {
        let bytes = match message {
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(error) => {
                debug!(conn = conn.0, %error, "connection error");
                break;
            }
        };
        match codec::decode_discovery(&bytes) {
            Ok(DiscoveryMessage::Register { server_id, address }) => {
                info!(conn = conn.0, %server_id, %address, "server registered");
                let mut state = state.lock().await;
                state.registry.register(conn, server_id, address);
                state.broadcast_snapshot();
            }
            Ok(other) => {
                warn!(conn = conn.0, ?other, "unexpected discovery envelope, dropped");
            }
            Err(error) => {
                warn!(conn = conn.0, %error, "malformed discovery envelope, dropped");
            }
        }
    }

    writer.abort();
    let mut state = state.lock().await;
    state.links.remove(&conn);
    if state.registry.disconnect(conn).is_some() {
        info!(conn = conn.0, "server unregistered");
        state.broadcast_snapshot();
    }
}
