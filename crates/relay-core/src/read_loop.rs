//! Per-connection read loop.

use crate::connection::ConnectionId;
use crate::dispatcher::Dispatcher;
use relay_protocol::codec;
use relay_transport::FrameReader;
use tracing::{debug, trace, warn};

/// Why a read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The client closed the stream.
    Closed,
    /// Reading from the stream failed.
    ReadError,
    /// The dispatch engine stopped accepting operations.
    EngineStopped,
}

/// What a finished read loop observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLoopSummary {
    /// Frames read, malformed ones included.
    pub frames: u64,
    /// Frames that did not decode as an envelope.
    pub malformed: u64,
    /// Why the loop ended.
    pub exit: ExitReason,
}

/// Read frames from `reader` and route them until the stream ends.
///
/// Malformed frames are logged and skipped. The sender field of every routed
/// envelope is overwritten with `id`. When the loop ends, exactly one
/// unregister for `id` is submitted.
pub async fn run_read_loop<R: FrameReader>(
    id: &ConnectionId,
    mut reader: R,
    dispatcher: &Dispatcher,
) -> ReadLoopSummary {
    let mut frames = 0;
    let mut malformed = 0;

    let exit = loop {
        let frame = match reader.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(connection = %id, "Client closed stream");
                break ExitReason::Closed;
            }
            Err(e) => {
                debug!(connection = %id, error = %e, "Read failed");
                break ExitReason::ReadError;
            }
        };
        frames += 1;

        let mut envelope = match codec::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                malformed += 1;
                warn!(connection = %id, error = %e, "Dropping malformed frame");
                continue;
            }
        };

        envelope.from = id.to_string();
        trace!(connection = %id, kind = %envelope.kind, "Routing envelope");

        if dispatcher.route(envelope).await.is_err() {
            debug!(connection = %id, "Dispatch engine stopped");
            break ExitReason::EngineStopped;
        }
    };

    if let Err(e) = dispatcher.unregister(id.clone()).await {
        debug!(connection = %id, error = %e, "Unregister not submitted");
    }

    ReadLoopSummary {
        frames,
        malformed,
        exit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{spawn_writer, ConnectionRecord};
    use crate::dispatcher::DispatcherConfig;
    use relay_protocol::{Envelope, SystemKind};
    use relay_transport::memory::{self, MemoryPeer};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn register(
        dispatcher: &Dispatcher,
        id: &str,
        room: Option<&str>,
    ) -> (memory::MemoryReader, MemoryPeer) {
        let (reader, writer, peer) = memory::pair();
        let outbound = spawn_writer(id.into(), writer, 16);
        let record = ConnectionRecord::new(id.into(), room.map(String::from), outbound);
        dispatcher.register(record).await.unwrap();
        (reader, peer)
    }

    async fn next_envelope(peer: &mut MemoryPeer) -> Envelope {
        let frame = timeout(Duration::from_secs(1), peer.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended");
        codec::decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_sender_is_overwritten_and_malformed_frames_skipped() {
        let (dispatcher, _engine) = Dispatcher::spawn(DispatcherConfig::default());
        let (_r, mut target) = register(&dispatcher, "target", None).await;
        let (reader, mut sender) = register(&dispatcher, "sender", None).await;

        sender.send("not json");
        sender.send(r#"{"from":"nobody"}"#);
        sender.send(r#"{"type":"offer","from":"mallory","to":"target"}"#);
        sender.hang_up();

        let summary = run_read_loop(&"sender".into(), reader, &dispatcher).await;
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.malformed, 2);
        assert_eq!(summary.exit, ExitReason::Closed);

        let offer = next_envelope(&mut target).await;
        assert_eq!(offer.kind, "offer");
        assert_eq!(offer.from, "sender");

        assert_eq!(sender.recv().await, None);
        assert_eq!(sender.close_count(), 1);
        assert_eq!(dispatcher.stats().await.unwrap().connection_count, 1);
    }

    #[tokio::test]
    async fn test_null_sender_is_replaced_with_connection_id() {
        let (dispatcher, _engine) = Dispatcher::spawn(DispatcherConfig::default());
        let (_r, mut target) = register(&dispatcher, "target", None).await;
        let (reader, mut sender) = register(&dispatcher, "sender", None).await;

        sender.send(r#"{"type":"offer","from":null,"to":"target","payload":{}}"#);
        sender.hang_up();

        let summary = run_read_loop(&"sender".into(), reader, &dispatcher).await;
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.malformed, 0);

        let offer = next_envelope(&mut target).await;
        assert_eq!(offer.kind, "offer");
        assert_eq!(offer.from, "sender");
        assert_eq!(offer.payload, Some(serde_json::json!({})));
    }

    #[tokio::test]
    async fn test_read_error_unregisters_once() {
        let (dispatcher, _engine) = Dispatcher::spawn(DispatcherConfig::default());
        let (_r, mut watcher) = register(&dispatcher, "watcher", Some("r")).await;
        let (reader, mut peer) = register(&dispatcher, "flaky", Some("r")).await;
        assert_eq!(next_envelope(&mut watcher).await.from, "flaky");

        peer.inject_read_error("connection reset");
        let summary = run_read_loop(&"flaky".into(), reader, &dispatcher).await;
        assert_eq!(summary.exit, ExitReason::ReadError);

        let notice = next_envelope(&mut watcher).await;
        assert_eq!(notice.system_kind(), Some(SystemKind::UserLeft));
        assert_eq!(notice.from, "flaky");
        assert_eq!(peer.recv().await, None);
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_stopped_engine_ends_loop() {
        let (dispatcher, engine) = Dispatcher::spawn(DispatcherConfig::default());
        let (reader, peer) = register(&dispatcher, "late", None).await;

        dispatcher.shutdown().await.unwrap();
        engine.await.unwrap();

        peer.send(r#"{"type":"chat","roomId":"r"}"#);
        let summary = run_read_loop(&"late".into(), reader, &dispatcher).await;
        assert_eq!(summary.exit, ExitReason::EngineStopped);
        assert_eq!(summary.frames, 1);
    }
}
