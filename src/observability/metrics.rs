//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define relay metrics (connections, frames, relays, violations)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `relay_connections_open` (gauge): currently accepted TCP connections
//! - `relay_bytes_in_total` (counter): bytes read from WebSocket peers
//! - `relay_frames_in_total` (counter): decoded frames by opcode
//! - `relay_messages_relayed_total` (counter): text messages broadcast
//! - `relay_deliveries_total` (counter): per-member frame deliveries
//! - `relay_protocol_violations_total` (counter): violations by kind
//! - `relay_handshakes_total` (counter): request heads by outcome
//! - `relay_transport_errors_total` (counter): socket errors by kind
//! - `relay_slow_consumers_total` (counter): members evicted for a full queue
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op
//! - Labels are static strings only

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Failure is logged; the relay keeps running without metrics.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn connection_opened() {
    ::metrics::gauge!("relay_connections_open").increment(1.0);
}

pub fn connection_closed() {
    ::metrics::gauge!("relay_connections_open").decrement(1.0);
}

pub fn bytes_received(n: usize) {
    ::metrics::counter!("relay_bytes_in_total").increment(n as u64);
}

pub fn frame_received(opcode: &'static str) {
    ::metrics::counter!("relay_frames_in_total", "opcode" => opcode).increment(1);
}

/// One text message fanned out to `delivered` members.
pub fn message_relayed(delivered: usize) {
    ::metrics::counter!("relay_messages_relayed_total").increment(1);
    ::metrics::counter!("relay_deliveries_total").increment(delivered as u64);
}

pub fn protocol_violation(kind: &'static str) {
    ::metrics::counter!("relay_protocol_violations_total", "kind" => kind).increment(1);
}

pub fn handshake(outcome: &'static str) {
    ::metrics::counter!("relay_handshakes_total", "outcome" => outcome).increment(1);
}

pub fn slow_consumer() {
    ::metrics::counter!("relay_slow_consumers_total").increment(1);
}

pub fn transport_error(kind: &'static str) {
    ::metrics::counter!("relay_transport_errors_total", "kind" => kind).increment(1);
}
