//! Discovery service for the mesh coordination layer.
//!
//! A singleton registry process: servers register `{server_id, address}` over
//! a WebSocket connection, and on any membership change the complete snapshot
//! is rebroadcast to every registered server. Membership state lives in
//! [`registry::Registry`], which is pure and independently testable; the
//! socket plumbing lives in [`service`].

pub mod registry;
pub mod service;

pub use registry::{ConnId, Registry};
pub use service::DiscoveryService;
