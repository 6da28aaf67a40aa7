//! Shared wire model for the mesh coordination layer.
//!
//! Holds the envelope types exchanged between server nodes and the discovery
//! service, the binary codec (with optional deflate compression), broadcast
//! options in both in-process and wire form, and environment-driven
//! configuration. Networking lives in `mesh-discovery` and `mesh-adapter`.

pub mod codec;
pub mod config;
pub mod ids;
pub mod message;
pub mod options;

pub use codec::{decode_discovery, decode_mesh, encode_discovery, encode_mesh, CodecError};
pub use config::{ConfigError, MeshConfig};
pub use ids::{RequestId, Room, ServerId, SocketId};
pub use message::{DiscoveryMessage, MeshMessage, Packet, ServerEntry};
pub use options::{BroadcastFlags, BroadcastOptions, WireOptions};
