//! Instrumentation for the connection manager.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the embedding binary installs a recorder.

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "ferry_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "ferry_connections_active";
    pub const MESSAGES_TOTAL: &str = "ferry_messages_total";
    pub const MESSAGES_BYTES: &str = "ferry_messages_bytes";
    pub const SEND_REJECTED_TOTAL: &str = "ferry_send_rejected_total";
    pub const DECODE_ERRORS_TOTAL: &str = "ferry_decode_errors_total";
    pub const HANDLER_ERRORS_TOTAL: &str = "ferry_handler_errors_total";
    pub const HEARTBEAT_TERMINATIONS_TOTAL: &str = "ferry_heartbeat_terminations_total";
    pub const ROOMS_ACTIVE: &str = "ferry_rooms_active";
    pub const PEERS_ACTIVE: &str = "ferry_peers_active";
    pub const HANDLER_LATENCY_SECONDS: &str = "ferry_handler_latency_seconds";
}

/// Register descriptions for every metric.
pub fn describe() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of envelopes processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of envelopes processed");
    metrics::describe_counter!(
        names::SEND_REJECTED_TOTAL,
        "Outbound payloads refused by the byte cap"
    );
    metrics::describe_counter!(
        names::DECODE_ERRORS_TOTAL,
        "Inbound envelopes that failed to decrypt or parse"
    );
    metrics::describe_counter!(names::HANDLER_ERRORS_TOTAL, "Handler failures and panics");
    metrics::describe_counter!(
        names::HEARTBEAT_TERMINATIONS_TOTAL,
        "Connections terminated for missing a heartbeat"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_gauge!(names::PEERS_ACTIVE, "Current number of bound peer IDs");
    metrics::describe_histogram!(
        names::HANDLER_LATENCY_SECONDS,
        "Handler execution time in seconds"
    );
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

/// Record an envelope. `direction` is `"inbound"` or `"outbound"`.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a payload refused by the byte cap.
pub fn record_send_rejected() {
    counter!(names::SEND_REJECTED_TOTAL).increment(1);
}

/// Record an inbound decode failure.
pub fn record_decode_error(kind: &'static str) {
    counter!(names::DECODE_ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Record a handler failure or panic.
pub fn record_handler_error(kind: &'static str) {
    counter!(names::HANDLER_ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Record handler latency.
pub fn record_handler_latency(seconds: f64) {
    histogram!(names::HANDLER_LATENCY_SECONDS).record(seconds);
}

/// Record a heartbeat termination.
pub fn record_heartbeat_termination() {
    counter!(names::HEARTBEAT_TERMINATIONS_TOTAL).increment(1);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Update bound peer count.
pub fn set_active_peers(count: usize) {
    gauge!(names::PEERS_ACTIVE).set(count as f64);
}
