//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_core::DispatcherStats;
use relay_transport::{FrameReader, FrameWriter, TransportError};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const FRAMES_TOTAL: &str = "relay_frames_total";
    pub const FRAMES_BYTES: &str = "relay_frames_bytes";
    pub const ROOMS_ACTIVE: &str = "relay_rooms_active";
    pub const ROUTED_TOTAL: &str = "relay_routed_total";
    pub const DROPPED_TOTAL: &str = "relay_dropped_total";
    pub const DELIVERY_FAILURES_TOTAL: &str = "relay_delivery_failures_total";
    pub const DECODE_ERRORS_TOTAL: &str = "relay_decode_errors_total";
    pub const REJECTED_UPGRADES_TOTAL: &str = "relay_rejected_upgrades_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames read or written");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames read or written");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of non-empty rooms");
    metrics::describe_counter!(names::ROUTED_TOTAL, "Envelopes whose target resolved");
    metrics::describe_counter!(
        names::DROPPED_TOTAL,
        "Envelopes dropped as unroutable or with an unknown target"
    );
    metrics::describe_counter!(
        names::DELIVERY_FAILURES_TOTAL,
        "Frames that could not be queued for a recipient"
    );
    metrics::describe_counter!(
        names::DECODE_ERRORS_TOTAL,
        "Inbound frames that were not valid envelopes"
    );
    metrics::describe_counter!(
        names::REJECTED_UPGRADES_TOTAL,
        "Connection attempts refused before upgrade"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid metrics address: {}:{}", host, port))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record inbound frames that failed to decode.
pub fn record_decode_errors(count: u64) {
    if count > 0 {
        counter!(names::DECODE_ERRORS_TOTAL).increment(count);
    }
}

/// Record a refused upgrade.
pub fn record_rejected_upgrade(reason: &'static str) {
    counter!(names::REJECTED_UPGRADES_TOTAL, "reason" => reason).increment(1);
}

/// Publish the engine's counters.
pub fn record_dispatch_stats(stats: &DispatcherStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    counter!(names::ROUTED_TOTAL).absolute(stats.routed_total);
    counter!(names::DROPPED_TOTAL).absolute(stats.dropped_total);
    counter!(names::DELIVERY_FAILURES_TOTAL).absolute(stats.delivery_failures_total);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// A transport half that records every frame it carries.
pub struct Metered<T> {
    inner: T,
}

impl<T> Metered<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: FrameReader> FrameReader for Metered<R> {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let frame = self.inner.recv().await?;
        if let Some(frame) = &frame {
            record_frame(frame.len(), "inbound");
        }
        Ok(frame)
    }
}

#[async_trait]
impl<W: FrameWriter> FrameWriter for Metered<W> {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let len = frame.len();
        self.inner.send(frame).await?;
        record_frame(len, "outbound");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}
