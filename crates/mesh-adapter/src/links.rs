//! Peer link manager: snapshot reconciliation and the discovery client loop.

use crate::context::{MeshContext, PeerRecord};
use crate::link::Connector;
use futures_util::{SinkExt, StreamExt};
use mesh_core::{codec, DiscoveryMessage, ServerEntry};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Reconcile the peer table against a full discovery snapshot.
///
/// Entries absent from the snapshot are closed and removed; unseen server ids
/// are dialed; an id whose address changed gets its stale link closed and a
/// new one dialed under the same key. The owning server's entry is always
/// skipped. Dial failures are logged and left for the next snapshot.
pub async fn apply_snapshot(
    ctx: &Arc<MeshContext>,
    connector: &Arc<dyn Connector>,
    servers: Vec<ServerEntry>,
) {
    let known: HashSet<_> = servers.iter().map(|entry| entry.server_id).collect();
    let current = ctx.peer_addresses().await;

    for server_id in current.keys() {
        if !known.contains(server_id) {
            ctx.evict_peer(*server_id).await;
        }
    }

    for entry in servers {
        if entry.server_id == ctx.server_id {
            continue;
        }
        match current.get(&entry.server_id) {
            Some(address) if *address == entry.address => continue,
            Some(stale) => {
                debug!(server_id = %entry.server_id, old = %stale, new = %entry.address, "peer address changed");
                ctx.evict_peer(entry.server_id).await;
            }
            None => {}
        }
        match connector.open(ctx, entry.server_id, &entry.address).await {
            Ok(link) => {
                info!(server_id = %entry.server_id, address = %entry.address, "peer link opened");
                ctx.insert_peer(
                    entry.server_id,
                    PeerRecord {
                        address: entry.address,
                        link,
                    },
                )
                .await;
            }
            Err(error) => {
                warn!(server_id = %entry.server_id, address = %entry.address, %error, "peer dial failed");
            }
        }
    }
}

/// Maintain the connection to the discovery service.
///
/// On every (re)connect the registration is sent immediately, then snapshots
/// are consumed until the connection drops. Loss triggers a fixed-delay
/// retry, indefinitely; there is no backoff growth and no give-up.
pub async fn run_discovery(ctx: Arc<MeshContext>, connector: Arc<dyn Connector>) {
    loop {
        match tokio_tungstenite::connect_async(&ctx.config.discovery_address).await {
            Ok((ws, _)) => {
                info!(address = %ctx.config.discovery_address, "connected to discovery service");
                let (mut sink, mut source) = ws.split();

                let register = DiscoveryMessage::Register {
                    server_id: ctx.server_id,
                    address: ctx.config.server_address.clone(),
                };
                let registered = match codec::encode_discovery(&register) {
                    Ok(bytes) => sink.send(Message::Binary(bytes)).await.is_ok(),
                    Err(error) => {
                        warn!(%error, "failed to encode registration");
                        false
                    }
                };

                if registered {
                    while let Some(message) = source.next().await {
                        match message {
                            Ok(Message::Binary(bytes)) => match codec::decode_discovery(&bytes) {
                                Ok(DiscoveryMessage::Update { servers }) => {
                                    apply_snapshot(&ctx, &connector, servers).await;
                                }
                                Ok(other) => {
                                    warn!(?other, "unexpected discovery envelope, dropped");
                                }
                                Err(error) => {
                                    warn!(%error, "malformed discovery envelope, dropped");
                                }
                            },
                            Ok(Message::Close(_)) => break,
                            Ok(_) => {}
                            Err(error) => {
                                warn!(%error, "discovery connection error");
                                break;
                            }
                        }
                    }
                }
                info!("discovery connection lost, reconnecting");
            }
            Err(error) => {
                warn!(address = %ctx.config.discovery_address, %error, "discovery connect failed");
            }
        }
        tokio::time::sleep(ctx.config.reconnect_delay).await;
    }
}
