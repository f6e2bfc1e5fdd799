//! Transport abstraction traits for the relay.
//!
//! These traits define the interface that all transport implementations must
//! provide, allowing the dispatch engine to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// The read half of a transport stream.
///
/// Only data frames are surfaced; control traffic such as ping/pong is
/// handled by the implementation.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next data frame.
    ///
    /// Returns `None` if the stream was closed cleanly.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The write half of a transport stream.
///
/// Frames passed to [`FrameWriter::send`] are complete encoded envelopes and
/// are written as one discrete transport message each.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the stream gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}
