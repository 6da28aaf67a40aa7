//! Per-server mesh coordination layer.
//!
//! Each server process owns one [`MeshContext`] (peer table, pending query
//! table, namespace registry) shared by one [`MeshAdapter`] per namespace.
//! The link manager reconciles the peer table against discovery snapshots;
//! the adapter propagates local mutations to all open peer links and answers
//! distributed queries by fan-out/fan-in with a deadline.
//!
//! Everything here is best-effort and at-most-once: send failures evict the
//! peer until the next snapshot, queries resolve with whatever arrived by the
//! deadline, and no failure is fatal to the owning process.

pub mod adapter;
pub mod context;
pub mod error;
pub mod link;
pub mod links;
pub mod local;
pub mod router;
pub mod server;

pub use adapter::MeshAdapter;
pub use context::{MeshContext, PeerRecord};
pub use error::MeshError;
pub use link::{Connector, PeerLink, WsConnector};
pub use local::{LocalAdapter, MemoryLocalAdapter};

#[cfg(test)]
pub(crate) mod testutil;
