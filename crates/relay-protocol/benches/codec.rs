//! Codec benchmarks for relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, Envelope};
use serde_json::json;

fn sample(size: usize) -> Envelope {
    Envelope::new("chat")
        .with_from("3f1c2a9e-0b7d-4d8e-9a51-6c2f0e4b7a13")
        .with_room("lobby")
        .with_payload(json!({ "text": "x".repeat(size) }))
}

fn bench_encode_small(c: &mut Criterion) {
    let envelope = sample(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::encode(black_box(&envelope)))
    });
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let encoded = codec::encode(&sample(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_inbound_path(c: &mut Criterion) {
    // Decode, stamp the sender, re-encode: what every routed frame costs.
    let raw = codec::encode(&sample(256)).unwrap();

    c.bench_function("inbound_256B", |b| {
        b.iter(|| {
            let mut envelope = codec::decode(black_box(&raw)).unwrap();
            envelope.from = String::from("sender");
            codec::encode(black_box(&envelope)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_inbound_path
);
criterion_main!(benches);
