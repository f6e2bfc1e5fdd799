//! Connection bootstrap.
//!
//! Turns a freshly accepted stream into a registered connection: mints its
//! id, starts its writer, greets it and hands back a [`Session`] that runs
//! the read loop.

use crate::connection::{spawn_writer, ConnectionId, ConnectionRecord};
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::read_loop::{run_read_loop, ReadLoopSummary};
use crate::room::validate_room_name;
use relay_protocol::{codec, Envelope};
use relay_transport::{FrameReader, FrameWriter};
use tracing::{error, info, warn};

/// A registered connection whose read loop has not started yet.
#[derive(Debug)]
pub struct Session<R> {
    id: ConnectionId,
    reader: R,
    dispatcher: Dispatcher,
}

impl<R: FrameReader> Session<R> {
    /// The connection's identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Run the read loop until the stream ends. The connection is
    /// unregistered on return.
    pub async fn run(self) -> ReadLoopSummary {
        let summary = run_read_loop(&self.id, self.reader, &self.dispatcher).await;
        info!(
            connection = %self.id,
            frames = summary.frames,
            malformed = summary.malformed,
            exit = ?summary.exit,
            "Connection closed"
        );
        summary
    }
}

/// Open a connection over a stream, optionally joining `room`.
///
/// The `connected` envelope is queued before registration, so it is the
/// first frame the client receives. An empty room name means no room.
///
/// # Errors
///
/// Returns an error if the room name is invalid, the id is already
/// registered or the engine stopped. On registration failure the stream is
/// closed.
pub async fn open<R, W>(
    dispatcher: &Dispatcher,
    room: Option<String>,
    reader: R,
    writer: W,
) -> Result<Session<R>, DispatchError>
where
    R: FrameReader,
    W: FrameWriter + 'static,
{
    let room = room.filter(|r| !r.is_empty());
    if let Some(name) = room.as_deref() {
        validate_room_name(name).map_err(DispatchError::InvalidRoom)?;
    }

    let id = ConnectionId::generate();
    let outbound = spawn_writer(id.clone(), writer, dispatcher.outbound_capacity());

    match codec::encode(&Envelope::connected(id.as_str())) {
        Ok(frame) => {
            if let Err(e) = outbound.deliver(frame) {
                warn!(connection = %id, error = %e, "Failed to queue greeting");
            }
        }
        Err(e) => error!(connection = %id, error = %e, "Failed to encode greeting"),
    }

    let joined = room.clone();
    dispatcher
        .register(ConnectionRecord::new(id.clone(), room, outbound))
        .await?;

    info!(
        connection = %id,
        room = joined.as_deref().unwrap_or(""),
        "Connection opened"
    );

    Ok(Session {
        id,
        reader,
        dispatcher: dispatcher.clone(),
    })
}
