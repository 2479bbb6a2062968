//! Prometheus metrics module
//!
//! `UplinkMetrics` owns the recorder handle used by the `/metrics`
//! endpoint; the free recording functions go through the `metrics`
//! macros and are safe to call from anywhere, including tests where no
//! recorder is installed.

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Prometheus recorder for the uplink process
#[derive(Clone)]
pub struct UplinkMetrics {
    handle: Arc<PrometheusHandle>,
}

impl UplinkMetrics {
    /// Install the global recorder and register metric descriptions.
    /// Call once per process.
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        Self::register_metrics();

        Self {
            handle: Arc::new(handle),
        }
    }

    fn register_metrics() {
        describe_counter!(
            "uplink_probes_total",
            Unit::Count,
            "Node status probes by outcome"
        );
        describe_counter!(
            "uplink_probe_retries_total",
            Unit::Count,
            "Transient probe failures retried in place"
        );
        describe_counter!(
            "uplink_errors_total",
            Unit::Count,
            "Terminal uplink errors by type"
        );
        describe_counter!(
            "uplink_events_emitted_total",
            Unit::Count,
            "Lifecycle events emitted to consumers"
        );
        describe_counter!(
            "uplink_shard_messages_total",
            Unit::Count,
            "Messages received over shard sessions"
        );
        describe_counter!(
            "uplink_shard_reconnects_total",
            Unit::Count,
            "Shard session reconnects after credential expiry"
        );

        describe_gauge!(
            "uplink_nodes_connected",
            Unit::Count,
            "Watched nodes currently reachable"
        );
        describe_gauge!(
            "uplink_shards_connected",
            Unit::Count,
            "Shard sessions currently authenticated"
        );
        describe_gauge!(
            "uplink_shard_ping_seconds",
            Unit::Seconds,
            "Last auth round-trip per shard"
        );
    }

    /// Render metrics in Prometheus exposition format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for UplinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Record one node probe with its classified outcome
pub fn record_probe(node_id: u64, outcome: &'static str) {
    counter!(
        "uplink_probes_total",
        "node_id" => node_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record one in-place retry of a transient probe failure
pub fn record_retry(node_id: u64) {
    counter!(
        "uplink_probe_retries_total",
        "node_id" => node_id.to_string()
    )
    .increment(1);
}

/// Record a terminal error by its taxonomy label
pub fn record_error(error_type: &'static str) {
    counter!("uplink_errors_total", "error_type" => error_type).increment(1);
}

/// Record a lifecycle event emission
pub fn record_event(event_type: &'static str) {
    counter!("uplink_events_emitted_total", "event_type" => event_type).increment(1);
}

/// Record an inbound shard message
pub fn record_shard_message(shard_id: u64) {
    counter!(
        "uplink_shard_messages_total",
        "shard_id" => shard_id.to_string()
    )
    .increment(1);
}

/// Record a shard reconnect triggered by token expiry
pub fn record_shard_reconnect(shard_id: u64) {
    counter!(
        "uplink_shard_reconnects_total",
        "shard_id" => shard_id.to_string()
    )
    .increment(1);
}

/// Set the last measured auth round-trip for a shard
pub fn set_shard_ping(shard_id: u64, ping: Duration) {
    gauge!(
        "uplink_shard_ping_seconds",
        "shard_id" => shard_id.to_string()
    )
    .set(ping.as_secs_f64());
}

/// Set the count of currently reachable nodes
pub fn set_nodes_connected(count: usize) {
    gauge!("uplink_nodes_connected").set(count as f64);
}

/// Set the count of currently authenticated shard sessions
pub fn set_shards_connected(count: usize) {
    gauge!("uplink_shards_connected").set(count as f64);
}
