//! Latency benchmarks for the relay.
//!
//! These benchmarks focus on measuring the time from submission to delivery.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relay_bench::{populate, receive_one_each, BENCH_ROOM};
use relay_core::{spawn_writer, ConnectionId, ConnectionRecord, Dispatcher, DispatcherConfig};
use relay_protocol::Envelope;
use relay_transport::memory;
use std::time::Instant;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark one direct message from submission to arrival.
fn bench_direct_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("direct_latency");

    let (dispatcher, mut peers) = rt.block_on(async {
        let (dispatcher, _engine) = Dispatcher::spawn(DispatcherConfig::default());
        let peers = populate(&dispatcher, BENCH_ROOM, 1).await.unwrap();
        (dispatcher, peers)
    });
    let envelope = Envelope::new("ping")
        .with_from("bench-sender")
        .with_to("member-0");

    group.bench_function("engine", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    dispatcher.route(black_box(envelope.clone())).await.unwrap();
                    peers[0].recv().await;
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

/// Benchmark a raw inbound frame through decode, routing and delivery.
fn bench_inbound_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("inbound_latency");

    let (sender, frame, mut receiver) = rt.block_on(async {
        let (dispatcher, _engine) = Dispatcher::spawn(DispatcherConfig::default());

        let (reader, writer, mut sender) = memory::pair();
        let session = relay_core::open(&dispatcher, None, reader, writer)
            .await
            .unwrap();
        sender.recv().await;
        tokio::spawn(session.run());

        let (reader, writer, mut receiver) = memory::pair();
        let session = relay_core::open(&dispatcher, None, reader, writer)
            .await
            .unwrap();
        let receiver_id = session.id().clone();
        receiver.recv().await;
        tokio::spawn(session.run());

        let frame = format!(r#"{{"type":"ping","to":"{}"}}"#, receiver_id);
        (sender, frame, receiver)
    });

    group.bench_function("read_loop", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    sender.send(black_box(frame.clone()));
                    receiver.recv().await;
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

/// Benchmark a join and leave in a populated room, including notifications.
fn bench_membership_churn(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("membership_churn");

    let (dispatcher, mut members) = rt.block_on(async {
        let (dispatcher, _engine) = Dispatcher::spawn(DispatcherConfig::default());
        let members = populate(&dispatcher, BENCH_ROOM, 10).await.unwrap();
        (dispatcher, members)
    });

    group.bench_function("join_leave_10", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    let (_reader, writer, _peer) = memory::pair();
                    let id = ConnectionId::generate();
                    let outbound = spawn_writer(id.clone(), writer, 16);
                    let record = ConnectionRecord::new(id.clone(), Some(BENCH_ROOM.into()), outbound);

                    dispatcher.register(record).await.unwrap();
                    dispatcher.unregister(id).await.unwrap();
                    receive_one_each(&mut members).await;
                    receive_one_each(&mut members).await;
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_direct_latency,
    bench_inbound_latency,
    bench_membership_churn,
);
criterion_main!(benches);
