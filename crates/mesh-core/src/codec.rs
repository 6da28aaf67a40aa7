//! Binary codec for protocol envelopes.
//!
//! Mesh envelopes are bincode-encoded and wrapped in a [`WireFrame`]; the
//! frame either carries the encoded message verbatim or a deflated copy when
//! the sender asked for compression. Discovery traffic is plain bincode and is
//! never compressed.

use crate::message::{DiscoveryMessage, MeshMessage};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Codec failures. Malformed input is an error value, never a panic; the
/// connection that produced it stays alive.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] bincode::Error),
    /// Frame or envelope bytes were malformed or truncated.
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] bincode::Error),
    /// Compression wrapper could not be produced or undone.
    #[error("compression failure: {0}")]
    Compression(#[source] std::io::Error),
}

/// Outer wire frame: either the encoded envelope itself or a deflated copy
/// behind a compression marker.
#[derive(Debug, Serialize, Deserialize)]
enum WireFrame {
    Plain(Vec<u8>),
    Deflated(Vec<u8>),
}

/// Encode a mesh envelope, optionally deflating the payload.
pub fn encode_mesh(message: &MeshMessage, compress: bool) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(message).map_err(CodecError::Encode)?;
    let frame = if compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&payload)
            .and_then(|()| encoder.finish())
            .map(WireFrame::Deflated)
            .map_err(CodecError::Compression)?
    } else {
        WireFrame::Plain(payload)
    };
    bincode::serialize(&frame).map_err(CodecError::Encode)
}

/// Decode a mesh envelope, inflating first when the frame is marked
/// compressed.
pub fn decode_mesh(bytes: &[u8]) -> Result<MeshMessage, CodecError> {
    let frame: WireFrame = bincode::deserialize(bytes).map_err(CodecError::Decode)?;
    let payload = match frame {
        WireFrame::Plain(payload) => payload,
        WireFrame::Deflated(compressed) => {
            let mut decoder = ZlibDecoder::new(compressed.as_slice());
            let mut payload = Vec::new();
            decoder
                .read_to_end(&mut payload)
                .map_err(CodecError::Compression)?;
            payload
        }
    };
    bincode::deserialize(&payload).map_err(CodecError::Decode)
}

/// Encode a discovery envelope.
pub fn encode_discovery(message: &DiscoveryMessage) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(message).map_err(CodecError::Encode)
}

/// Decode a discovery envelope.
pub fn decode_discovery(bytes: &[u8]) -> Result<DiscoveryMessage, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}
