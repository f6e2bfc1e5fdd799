//! Dispatch engine for the relay.
//!
//! The engine is a single task that owns the registry and processes
//! register, unregister and route operations strictly one at a time from a
//! bounded queue. That total order is what makes the join/leave notification
//! guarantees hold. Connection handlers talk to it through the cloneable
//! [`Dispatcher`] handle.

use crate::connection::{ConnectionId, ConnectionRecord};
use crate::registry::Registry;
use bytes::Bytes;
use relay_protocol::{codec, Envelope, Route};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The engine is no longer accepting operations.
    #[error("Dispatch engine stopped")]
    EngineStopped,

    /// A connection with this id is already registered.
    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Capacity of the engine's operation queue. Submitters wait when full.
    pub queue_capacity: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Unregister a recipient whose outbound queue is full or closed.
    pub evict_on_delivery_failure: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            outbound_capacity: 1024,
            evict_on_delivery_failure: false,
        }
    }
}

/// Dispatcher statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Number of registered connections.
    pub connection_count: usize,
    /// Number of non-empty rooms.
    pub room_count: usize,
    /// Envelopes whose target resolved.
    pub routed_total: u64,
    /// Envelopes dropped as unroutable or with an unknown target.
    pub dropped_total: u64,
    /// Frames that could not be queued for a recipient.
    pub delivery_failures_total: u64,
}

enum Command {
    Register {
        record: ConnectionRecord,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    Unregister(ConnectionId),
    Route(Envelope),
    Stats(oneshot::Sender<DispatcherStats>),
    RoomMembers {
        room: String,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    Shutdown,
}

/// Handle to the dispatch engine.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Command>,
    outbound_capacity: usize,
}

impl Dispatcher {
    /// Start the engine task.
    #[must_use]
    pub fn spawn(config: DispatcherConfig) -> (Self, JoinHandle<()>) {
        info!("Starting dispatch engine with config: {:?}", config);

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = Self {
            tx,
            outbound_capacity: config.outbound_capacity,
        };
        let engine = Engine::new(config);

        (handle, tokio::spawn(engine.run(rx)))
    }

    /// Outbound queue capacity for new connections.
    #[must_use]
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    async fn submit(&self, command: Command) -> Result<(), DispatchError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| DispatchError::EngineStopped)
    }

    /// Register a connection and notify its room.
    ///
    /// Resolves once the engine has processed the registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already registered or the engine stopped.
    pub async fn register(&self, record: ConnectionRecord) -> Result<(), DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Register { record, reply }).await?;
        rx.await.map_err(|_| DispatchError::EngineStopped)?
    }

    /// Unregister a connection. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine stopped.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), DispatchError> {
        self.submit(Command::Unregister(id)).await
    }

    /// Route an envelope to its target.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine stopped.
    pub async fn route(&self, envelope: Envelope) -> Result<(), DispatchError> {
        self.submit(Command::Route(envelope)).await
    }

    /// Get engine statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine stopped.
    pub async fn stats(&self) -> Result<DispatcherStats, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Stats(reply)).await?;
        rx.await.map_err(|_| DispatchError::EngineStopped)
    }

    /// Get the sorted member ids of a room. Empty if the room does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine stopped.
    pub async fn room_members(&self, room: &str) -> Result<Vec<ConnectionId>, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::RoomMembers {
            room: room.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| DispatchError::EngineStopped)
    }

    /// Stop the engine once already queued operations are processed. Every
    /// connection still registered is closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine already stopped.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        self.submit(Command::Shutdown).await
    }
}

#[derive(Debug, Default)]
struct Counters {
    routed: u64,
    dropped: u64,
    delivery_failures: u64,
}

struct Engine {
    registry: Registry,
    config: DispatcherConfig,
    counters: Counters,
    evictions: Vec<ConnectionId>,
}

impl Engine {
    fn new(config: DispatcherConfig) -> Self {
        Self {
            registry: Registry::new(),
            config,
            counters: Counters::default(),
            evictions: Vec::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Register { record, reply } => {
                    let _ = reply.send(self.register(record));
                }
                Command::Unregister(id) => self.unregister(id.as_str()),
                Command::Route(envelope) => self.route(&envelope),
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::RoomMembers { room, reply } => {
                    let _ = reply.send(self.registry.room_members(&room));
                }
                Command::Shutdown => {
                    info!("Dispatch engine shutting down");
                    rx.close();
                }
            }
            self.process_evictions();
        }

        let remaining = self.registry.drain();
        info!(connections = remaining.len(), "Dispatch engine stopped");
        for record in remaining {
            record.close();
        }
    }

    fn register(&mut self, record: ConnectionRecord) -> Result<(), DispatchError> {
        let id = record.id().clone();
        let room = record.room().map(str::to_owned);

        if let Err(rejected) = self.registry.insert(record) {
            warn!(connection = %id, "Connection id already registered");
            rejected.close();
            return Err(DispatchError::DuplicateConnection(id));
        }

        debug!(
            connection = %id,
            room = room.as_deref().unwrap_or(""),
            connections = self.registry.connection_count(),
            "Registered"
        );

        if let Some(room) = room {
            let notice = Envelope::user_joined(id.as_str(), room.as_str());
            let notified = self.fan_out(&notice, &room, id.as_str());
            trace!(connection = %id, room = %room, notified, "Sent join notifications");
        }

        Ok(())
    }

    fn unregister(&mut self, id: &str) {
        let Some(record) = self.registry.remove(id) else {
            trace!(connection = %id, "Unregister for unknown connection");
            return;
        };

        if let Some(room) = record.room() {
            if self.registry.room_exists(room) {
                let notice = Envelope::user_left(id, room);
                let notified = self.fan_out(&notice, room, id);
                trace!(connection = %id, room = %room, notified, "Sent leave notifications");
            }
        }

        debug!(
            connection = %id,
            connections = self.registry.connection_count(),
            "Unregistered"
        );
        record.close();
    }

    fn route(&mut self, envelope: &Envelope) {
        match envelope.route() {
            Some(Route::Direct(to)) => {
                let Some(record) = self.registry.get(to) else {
                    debug!(from = %envelope.from, to = %to, "Direct target not found, dropping");
                    self.counters.dropped += 1;
                    return;
                };
                let Some(frame) = encode(envelope) else {
                    return;
                };

                self.counters.routed += 1;
                if !deliver(record, &frame) {
                    let failed = record.id().clone();
                    self.record_failures(vec![failed]);
                }
                trace!(from = %envelope.from, to = %to, "Routed direct envelope");
            }
            Some(Route::Room(room)) => {
                if !self.registry.room_exists(room) {
                    debug!(from = %envelope.from, room = %room, "Room not found, dropping");
                    self.counters.dropped += 1;
                    return;
                }

                self.counters.routed += 1;
                let recipients = self.fan_out(envelope, room, &envelope.from);
                trace!(from = %envelope.from, room = %room, recipients, "Broadcast envelope");
            }
            None => {
                debug!(from = %envelope.from, kind = %envelope.kind, "Unroutable envelope, dropping");
                self.counters.dropped += 1;
            }
        }
    }

    /// Deliver `envelope` to every member of `room` except `exclude`.
    ///
    /// Returns the number of recipients the frame was queued for. A failed
    /// recipient never stops delivery to the others.
    fn fan_out(&mut self, envelope: &Envelope, room: &str, exclude: &str) -> usize {
        let Some(frame) = encode(envelope) else {
            return 0;
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for record in self.registry.room_recipients(room, exclude) {
            if deliver(record, &frame) {
                delivered += 1;
            } else {
                failed.push(record.id().clone());
            }
        }

        self.record_failures(failed);
        delivered
    }

    fn record_failures(&mut self, failed: Vec<ConnectionId>) {
        self.counters.delivery_failures += failed.len() as u64;
        if self.config.evict_on_delivery_failure {
            self.evictions.extend(failed);
        }
    }

    fn process_evictions(&mut self) {
        while let Some(id) = self.evictions.pop() {
            warn!(connection = %id, "Evicting connection after failed delivery");
            self.unregister(id.as_str());
        }
    }

    fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            connection_count: self.registry.connection_count(),
            room_count: self.registry.room_count(),
            routed_total: self.counters.routed,
            dropped_total: self.counters.dropped,
            delivery_failures_total: self.counters.delivery_failures,
        }
    }
}

fn encode(envelope: &Envelope) -> Option<Bytes> {
    match codec::encode(envelope) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(kind = %envelope.kind, error = %e, "Failed to encode envelope");
            None
        }
    }
}

fn deliver(record: &ConnectionRecord, frame: &Bytes) -> bool {
    match record.deliver(frame.clone()) {
        Ok(()) => true,
        Err(e) => {
            warn!(connection = %record.id(), error = %e, "Delivery failed");
            false
        }
    }
}
