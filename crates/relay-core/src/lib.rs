//! # relay-core
//!
//! Connection registry, rooms and message dispatch for the relay server.
//!
//! - **Dispatcher** - the engine task that owns all registry state and
//!   serializes register, unregister and route operations
//! - **Connection** - connection ids, records and the per-connection writer
//! - **Bootstrap** - turns an accepted stream into a registered session
//! - **Read loop** - decodes inbound frames and submits them for routing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  route   ┌──────────────┐  deliver  ┌──────────────┐
//! │  Read loop  │─────────▶│  Dispatcher  │──────────▶│ Writer task  │
//! └─────────────┘          │  (registry)  │           └──────────────┘
//!        ▲                 └──────────────┘                  │
//!        │                                                   ▼
//!   client frames                                      client frames
//! ```

pub mod bootstrap;
pub mod connection;
pub mod dispatcher;
pub mod read_loop;
mod registry;
pub mod room;

pub use bootstrap::{open, Session};
pub use connection::{spawn_writer, ConnectionId, ConnectionRecord, DeliveryError, Outbound};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig, DispatcherStats};
pub use read_loop::{run_read_loop, ExitReason, ReadLoopSummary};
pub use room::{validate_room_name, MAX_ROOM_NAME_LENGTH};
