//! Shared fixtures for the relay benchmarks.

use relay_core::{spawn_writer, ConnectionId, ConnectionRecord, DispatchError, Dispatcher};
use relay_protocol::Envelope;
use relay_transport::memory::{self, MemoryPeer};
use serde_json::json;

/// Room used by every benchmark.
pub const BENCH_ROOM: &str = "benchmark";

/// A chat envelope broadcast to `room` with a text payload of `size` bytes.
#[must_use]
pub fn chat(room: &str, size: usize) -> Envelope {
    Envelope::new("chat")
        .with_from("bench-sender")
        .with_room(room)
        .with_payload(json!({ "text": "x".repeat(size) }))
}

/// Register `members` in-memory connections in `room`.
///
/// Join notices are consumed before returning, so every peer starts with an
/// empty inbox.
///
/// # Errors
///
/// Returns an error if the engine rejects a registration.
pub async fn populate(
    dispatcher: &Dispatcher,
    room: &str,
    members: usize,
) -> Result<Vec<MemoryPeer>, DispatchError> {
    let mut peers = Vec::with_capacity(members);
    for i in 0..members {
        let (_reader, writer, peer) = memory::pair();
        let id = ConnectionId::new(format!("member-{}", i));
        let outbound = spawn_writer(id.clone(), writer, dispatcher.outbound_capacity());
        dispatcher
            .register(ConnectionRecord::new(id, Some(room.to_string()), outbound))
            .await?;
        peers.push(peer);
    }

    // Member i hears about everyone who joined after it.
    for (i, peer) in peers.iter_mut().enumerate() {
        for _ in i + 1..members {
            peer.recv().await;
        }
    }

    Ok(peers)
}

/// Wait for one frame on every peer. Returns how many arrived.
pub async fn receive_one_each(peers: &mut [MemoryPeer]) -> usize {
    let mut received = 0;
    for peer in peers.iter_mut() {
        if peer.recv().await.is_some() {
            received += 1;
        }
    }
    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::DispatcherConfig;

    #[tokio::test]
    async fn test_populate_and_broadcast() {
        let (dispatcher, _engine) = Dispatcher::spawn(DispatcherConfig::default());

        let mut peers = populate(&dispatcher, BENCH_ROOM, 5).await.unwrap();
        assert!(peers.iter_mut().all(|p| p.try_recv().is_none()));

        dispatcher.route(chat(BENCH_ROOM, 16)).await.unwrap();
        assert_eq!(receive_one_each(&mut peers).await, 5);
    }
}
