//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into a [`FrameReader`] /
//! [`FrameWriter`] pair. Outbound frames are sent as text messages; inbound
//! text and binary messages are both surfaced as data frames.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, trace};

use crate::traits::{FrameReader, FrameWriter, TransportError};

/// Split an upgraded WebSocket into independently owned halves.
#[must_use]
pub fn split(socket: WebSocket) -> (WebSocketReader, WebSocketWriter) {
    let (sink, stream) = socket.split();
    (
        WebSocketReader { inner: stream },
        WebSocketWriter {
            inner: sink,
            closed: false,
        },
    )
}

/// The read half of a WebSocket connection.
pub struct WebSocketReader {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::from(text))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by the protocol layer and flushed with
                    // the next outbound write.
                    trace!("Control frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

/// The write half of a WebSocket connection.
pub struct WebSocketWriter {
    inner: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let text = String::from_utf8(frame.to_vec())
            .map_err(|e| TransportError::SendFailed(format!("frame is not UTF-8: {e}")))?;

        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        self.inner
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {e}")))
    }
}
