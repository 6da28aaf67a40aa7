//! Identifier types shared across the mesh.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of one server node in the mesh.
///
/// Generated once per process at startup. A server never appears in its own
/// peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub Uuid);

impl ServerId {
    /// Generate a fresh server id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Correlation id for one fan-out query.
///
/// Allocated only when a query actually fans out to peers; local-only queries
/// never allocate one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Allocate a fresh request id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a locally connected client socket. Opaque to this layer.
pub type SocketId = String;

/// Name of a room (channel grouping). Opaque to this layer.
pub type Room = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_ids_are_unique() {
        assert_ne!(ServerId::generate(), ServerId::generate());
    }

    #[test]
    fn request_id_round_trips_through_serde() {
        let id = RequestId::generate();
        let bytes = bincode::serialize(&id).expect("serialize");
        let back: RequestId = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(id, back);
    }
}
