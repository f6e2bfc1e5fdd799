//! End-to-end throughput benchmark for the relay.
//!
//! This benchmark measures actual WebSocket broadcast throughput with real
//! network I/O. Every client joins the same room and broadcasts to it.

use futures_util::{SinkExt, StreamExt};
use relay_bench::{chat, BENCH_ROOM};
use relay_protocol::codec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let server_url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("Relay end-to-end throughput benchmark");
    println!("Make sure the server is running: cargo run --release --bin relay");
    println!();

    run_broadcast_benchmark(num_clients, &server_url).await;
}

async fn run_broadcast_benchmark(num_clients: usize, server_url: &str) {
    println!("Room broadcast: {} clients in \"{}\"", num_clients, BENCH_ROOM);
    println!("Warmup: {}s, measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));
    let url = format!("{}?roomId={}", server_url, BENCH_ROOM);

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(&url, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("All {} clients connected", num_clients);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);
    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();

    println!();
    println!("Clients:         {:>12}", num_clients);
    println!("Duration:        {:>12.2}s", elapsed.as_secs_f64());
    println!("Delivered:       {:>12}", total_messages);
    println!("Throughput:      {:>12.0} msg/s", msgs_per_sec);
    println!(
        "Per client:      {:>12.0} msg/s",
        msgs_per_sec / num_clients as f64
    );

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // The first frame is always the connected envelope.
    if let Some(Ok(_connected)) = receiver.next().await {}

    barrier.wait().await;

    let encoded = codec::encode(&chat(BENCH_ROOM, 64))?;
    let broadcast = Message::Text(String::from_utf8(encoded.to_vec())?);

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(text)) = result {
                if codec::decode(text.as_bytes()).is_ok() {
                    message_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    loop {
        if sender.send(broadcast.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
