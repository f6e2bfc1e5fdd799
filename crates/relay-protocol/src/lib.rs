//! # relay-protocol
//!
//! Wire protocol definitions for the relay server.
//!
//! Clients and the server exchange JSON envelopes, one per transport frame.
//!
//! ## Envelope kinds
//!
//! - Application kinds (`chat`, `offer`, ...) - opaque to the relay, routed by
//!   `to` or `roomId`
//! - `connected` - greeting carrying the assigned client id
//! - `user-joined` / `user-left` - room membership notifications
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Envelope, Route};
//!
//! let envelope = Envelope::new("chat")
//!     .with_room("lobby")
//!     .with_payload(serde_json::json!("hi"));
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.route(), Some(Route::Room("lobby")));
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{Envelope, Route, SystemKind, SERVER_SENDER};
