//! # relay-transport
//!
//! Transport abstraction layer for the relay server.
//!
//! A transport stream is split into two halves so that reading and writing
//! can be owned by different tasks:
//!
//! - [`FrameReader`] - owned by the connection's read loop
//! - [`FrameWriter`] - owned by the connection's single writer task
//!
//! Implementations:
//!
//! - **WebSocket** - axum WebSocket halves (feature `websocket`, default)
//! - **Memory** - an in-process pair used by tests and benchmarks
//!
//! ```rust,ignore
//! use relay_transport::FrameReader;
//!
//! async fn drain(mut reader: impl FrameReader) {
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         // Decode frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameReader, FrameWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketReader, WebSocketWriter};
