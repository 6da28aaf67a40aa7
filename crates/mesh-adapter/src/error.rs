//! Adapter errors.

use mesh_core::CodecError;

/// Failures surfaced by the mesh adapter.
///
/// None of these are fatal to the owning process; they degrade membership
/// accuracy or query completeness only.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// An envelope could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Dialing a peer failed.
    #[error("failed to connect to {address}: {reason}")]
    Connect {
        /// The address that was dialed.
        address: String,
        /// Underlying failure description.
        reason: String,
    },
    /// The peer link is no longer writable.
    #[error("peer link closed")]
    LinkClosed,
    /// A pending query was dropped without resolving. Indicates the owning
    /// context went away mid-flight.
    #[error("query dropped before resolution")]
    QueryAborted,
}
