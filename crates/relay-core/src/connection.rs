//! Connection records and the per-connection writer.
//!
//! Every connection owns exactly one writer task. All frames bound for the
//! connection, whether the bootstrap greeting or engine deliveries, pass
//! through its bounded outbound queue, so writes to one stream never
//! interleave.

use bytes::Bytes;
use relay_transport::FrameWriter;
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Failure to hand a frame to a connection's writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The outbound queue is at capacity.
    #[error("Outbound queue full")]
    QueueFull,

    /// The writer task has stopped.
    #[error("Connection writer closed")]
    Closed,
}

/// Sending side of a connection's outbound queue.
///
/// Not `Clone`: the owning [`ConnectionRecord`] is the only producer besides
/// the bootstrap greeting, and dropping it is what closes the stream.
#[derive(Debug)]
pub struct Outbound {
    tx: mpsc::Sender<Bytes>,
}

impl Outbound {
    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is full or the writer has stopped.
    pub fn deliver(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[cfg(test)]
impl Outbound {
    /// A handle whose writer is already gone.
    pub(crate) fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Spawn the writer task for a connection.
///
/// The task writes queued frames in order. A failed write is logged and the
/// task keeps draining. Once the [`Outbound`] handle is dropped and the queue
/// is empty, the stream is closed and the task exits.
pub fn spawn_writer<W>(id: ConnectionId, writer: W, capacity: usize) -> Outbound
where
    W: FrameWriter + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(run_writer(id, writer, rx));
    Outbound { tx }
}

async fn run_writer<W: FrameWriter>(id: ConnectionId, mut writer: W, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        trace!(connection = %id, bytes = frame.len(), "Writing frame");
        if let Err(e) = writer.send(frame).await {
            warn!(connection = %id, error = %e, "Write failed");
        }
    }

    if let Err(e) = writer.close().await {
        debug!(connection = %id, error = %e, "Close failed");
    }
    debug!(connection = %id, "Writer stopped");
}

/// Server-side handle for one live connection.
#[derive(Debug)]
pub struct ConnectionRecord {
    id: ConnectionId,
    room: Option<String>,
    outbound: Outbound,
}

impl ConnectionRecord {
    /// Create a record. An empty room name means no room.
    #[must_use]
    pub fn new(id: ConnectionId, room: Option<String>, outbound: Outbound) -> Self {
        Self {
            id,
            room: room.filter(|r| !r.is_empty()),
            outbound,
        }
    }

    /// The connection's identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The room joined at creation, if any.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Queue an encoded frame for this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be queued.
    pub fn deliver(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.outbound.deliver(frame)
    }

    /// Release the record. The writer flushes what is queued, then closes
    /// the stream.
    pub fn close(self) {
        debug!(connection = %self.id, "Closing connection");
    }
}
