//! Shared fakes for adapter tests: recording links and a canned connector.

use crate::context::{MeshContext, PeerRecord};
use crate::error::MeshError;
use crate::link::{Connector, PeerLink};
use async_trait::async_trait;
use mesh_core::ServerId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Records every frame instead of writing to a socket.
pub(crate) struct FakeLink {
    sent: Mutex<Vec<Vec<u8>>>,
    open: AtomicBool,
    fail: bool,
}

impl FakeLink {
    pub(crate) fn arc() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            fail: false,
        })
    }

    /// A link whose every send fails, for eviction tests.
    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            fail: true,
        })
    }

    pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl PeerLink for FakeLink {
    fn send(&self, frame: Vec<u8>) -> Result<(), MeshError> {
        if self.fail || !self.is_open() {
            return Err(MeshError::LinkClosed);
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }
}

/// Insert a recording link for a peer directly into the table.
pub(crate) async fn add_fake_peer(ctx: &Arc<MeshContext>, server_id: ServerId) -> Arc<FakeLink> {
    let link = FakeLink::arc();
    ctx.insert_peer(
        server_id,
        PeerRecord {
            address: format!("ws://fake/{server_id}"),
            link: link.clone(),
        },
    )
    .await;
    link
}

/// Insert a peer whose link rejects every send.
pub(crate) async fn add_failing_peer(ctx: &Arc<MeshContext>, server_id: ServerId) -> Arc<FakeLink> {
    let link = FakeLink::failing();
    ctx.insert_peer(
        server_id,
        PeerRecord {
            address: format!("ws://fake/{server_id}"),
            link: link.clone(),
        },
    )
    .await;
    link
}

/// Connector that hands out [`FakeLink`]s and records what it dialed.
pub(crate) struct FakeConnector {
    pub(crate) opened: Mutex<Vec<(ServerId, String)>>,
    pub(crate) links: Mutex<Vec<Arc<FakeLink>>>,
    fail: bool,
}

impl FakeConnector {
    pub(crate) fn arc() -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    /// A connector whose every dial fails.
    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            fail: true,
        })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(
        &self,
        _ctx: &Arc<MeshContext>,
        server_id: ServerId,
        address: &str,
    ) -> Result<Arc<dyn PeerLink>, MeshError> {
        if self.fail {
            return Err(MeshError::Connect {
                address: address.to_string(),
                reason: "refused".to_string(),
            });
        }
        self.opened.lock().unwrap().push((server_id, address.to_string()));
        let link = FakeLink::arc();
        self.links.lock().unwrap().push(Arc::clone(&link));
        Ok(link)
    }
}
