//! Codec for encoding and decoding relay envelopes.
//!
//! Each envelope travels as one JSON document in one transport frame, so no
//! length prefix is needed: the transport provides the framing.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::Envelope;

/// Maximum encoded envelope size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode an envelope to a JSON frame.
///
/// The returned bytes are always valid UTF-8.
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let data = serde_json::to_vec(envelope).map_err(ProtocolError::Encode)?;

    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(Bytes::from(data))
}

/// Decode an envelope from a JSON frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a valid envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}
