//! In-memory transport.
//!
//! [`pair`] returns the server-side halves of a connection together with a
//! [`MemoryPeer`] that plays the client: it injects inbound frames, observes
//! outbound frames and counts how often the stream was closed.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{FrameReader, FrameWriter, TransportError};

#[derive(Debug, Default)]
struct PeerState {
    closes: AtomicUsize,
    fail_writes: AtomicBool,
}

/// Create a connected in-memory stream.
#[must_use]
pub fn pair() -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let state = Arc::new(PeerState::default());

    (
        MemoryReader { rx: inbound_rx },
        MemoryWriter {
            tx: outbound_tx,
            state: Arc::clone(&state),
        },
        MemoryPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            state,
        },
    )
}

/// Server-side read half of an in-memory stream.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.rx.recv().await.transpose()
    }
}

/// Server-side write half of an in-memory stream.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<Bytes>,
    state: Arc<PeerState>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.state.closes.load(Ordering::SeqCst) > 0 {
            return Err(TransportError::ConnectionClosed);
        }
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected write failure".into()));
        }
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The client end of an in-memory stream.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Result<Bytes, TransportError>>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    state: Arc<PeerState>,
}

impl MemoryPeer {
    /// Send a frame to the server. Returns `false` once the peer hung up or
    /// the reader was dropped.
    pub fn send(&self, frame: impl Into<Bytes>) -> bool {
        self.inbound
            .as_ref()
            .map_or(false, |tx| tx.send(Ok(frame.into())).is_ok())
    }

    /// Make the server's next read fail.
    pub fn inject_read_error(&self, reason: &str) -> bool {
        self.inbound.as_ref().map_or(false, |tx| {
            tx.send(Err(TransportError::ReceiveFailed(reason.to_string())))
                .is_ok()
        })
    }

    /// Close the client side; the server's reader observes a clean end of
    /// stream after draining frames already sent.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Make every subsequent server write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Wait for the next frame written by the server.
    ///
    /// Returns `None` once the server-side writer was dropped and every
    /// frame has been received.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    /// Take a frame written by the server, if one is ready.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Number of times the server closed the stream.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Whether the server closed the stream.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}
