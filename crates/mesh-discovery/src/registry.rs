//! Pure membership state for the discovery service.

use mesh_core::{ServerEntry, ServerId};

/// Serial number identifying one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

#[derive(Debug)]
struct Registration {
    server_id: ServerId,
    address: String,
    conn: ConnId,
}

/// Registered servers in registration order.
///
/// One entry per server id: re-registering an existing id replaces its
/// address and connection in place. Eviction on connection close removes the
/// first entry whose connection matches; with a mis-registered duplicate id
/// which registrant survives is undefined upstream and not pinned here.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Registration>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration and return the resulting full snapshot.
    pub fn register(
        &mut self,
        conn: ConnId,
        server_id: ServerId,
        address: String,
    ) -> Vec<ServerEntry> {
        match self.entries.iter_mut().find(|e| e.server_id == server_id) {
            Some(existing) => {
                existing.address = address;
                existing.conn = conn;
            }
            None => self.entries.push(Registration {
                server_id,
                address,
                conn,
            }),
        }
        self.snapshot()
    }

    /// Drop the first registration held by a closed connection.
    ///
    /// Returns the new snapshot when an entry was removed, `None` when the
    /// connection never registered.
    pub fn disconnect(&mut self, conn: ConnId) -> Option<Vec<ServerEntry>> {
        let index = self.entries.iter().position(|e| e.conn == conn)?;
        self.entries.remove(index);
        Some(self.snapshot())
    }

    /// The complete current membership, never a delta.
    pub fn snapshot(&self) -> Vec<ServerEntry> {
        self.entries
            .iter()
            .map(|e| ServerEntry {
                server_id: e.server_id,
                address: e.address.clone(),
            })
            .collect()
    }

    /// Number of registered servers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no server is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
