//! Prometheus metrics for latency tracking and monitoring.
//!
//! This module provides metrics for:
//! - Order submission, signing and HTTP latency
//! - Stream message processing and book data quality
//! - Opportunity detection, execution and recovery outcomes

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::{debug, info};

// === Metric Name Constants ===

/// Order submission latency metric name.
pub const METRIC_ORDER_SUBMIT_LATENCY: &str = "order_submit_latency_ms";
/// Stream message latency metric name.
pub const METRIC_WS_MESSAGE_LATENCY: &str = "ws_message_latency_ms";
/// Opportunity detection latency metric name.
pub const METRIC_OPPORTUNITY_DETECTION_LATENCY: &str = "opportunity_detection_latency_ms";
/// HTTP request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "http_request_latency_ms";
/// Signing latency metric name.
pub const METRIC_SIGNING_LATENCY: &str = "signing_latency_ms";
/// Order book fetch latency metric name.
pub const METRIC_ORDERBOOK_FETCH_LATENCY: &str = "orderbook_fetch_latency_ms";
/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders filled counter metric name.
pub const METRIC_ORDERS_FILLED: &str = "orders_filled_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Opportunities detected counter metric name.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Opportunities executed counter metric name.
pub const METRIC_OPPORTUNITIES_EXECUTED: &str = "opportunities_executed_total";
/// Unwind orders submitted counter metric name.
pub const METRIC_UNWINDS: &str = "unwinds_total";
/// Failed unwinds (stranded exposure) counter metric name.
pub const METRIC_STRANDED: &str = "stranded_positions_total";
/// Stream messages received counter metric name.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "ws_messages_received_total";
/// Stream reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";
/// Dropped stream notifications counter metric name.
pub const METRIC_WS_NOTIFICATIONS_DROPPED: &str = "ws_notifications_dropped_total";
/// Malformed book entries counter metric name.
pub const METRIC_BOOK_DEFECTS: &str = "book_defects_total";
/// Failed scan cycles counter metric name.
pub const METRIC_SCAN_FAILURES: &str = "scan_cycles_failed_total";
/// Finalized market instances counter metric name.
pub const METRIC_MARKETS_FINALIZED: &str = "markets_finalized_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(METRIC_ORDER_SUBMIT_LATENCY, "Order submission latency in milliseconds");
    describe_histogram!(
        METRIC_WS_MESSAGE_LATENCY,
        "Stream message processing latency in milliseconds"
    );
    describe_histogram!(
        METRIC_OPPORTUNITY_DETECTION_LATENCY,
        "Time to scan both books for an opportunity in milliseconds"
    );
    describe_histogram!(METRIC_HTTP_REQUEST_LATENCY, "HTTP request latency in milliseconds");
    describe_histogram!(METRIC_SIGNING_LATENCY, "Order signing latency in milliseconds");
    describe_histogram!(METRIC_ORDERBOOK_FETCH_LATENCY, "Order book fetch latency in milliseconds");

    describe_counter!(METRIC_ORDERS_SUBMITTED, "Total number of orders submitted");
    describe_counter!(METRIC_ORDERS_FILLED, "Total number of orders filled");
    describe_counter!(METRIC_ORDERS_FAILED, "Total number of orders that failed");
    describe_counter!(METRIC_OPPORTUNITIES_DETECTED, "Total number of opportunities detected");
    describe_counter!(METRIC_OPPORTUNITIES_EXECUTED, "Total number of paired trades fully filled");
    describe_counter!(METRIC_UNWINDS, "Total number of unwind orders submitted");
    describe_counter!(METRIC_STRANDED, "Total number of single legs left unflattened");
    describe_counter!(METRIC_WS_MESSAGES_RECEIVED, "Total number of stream messages received");
    describe_counter!(METRIC_WS_RECONNECTS, "Total number of stream reconnections");
    describe_counter!(
        METRIC_WS_NOTIFICATIONS_DROPPED,
        "Book notifications dropped while the scanner was busy"
    );
    describe_counter!(METRIC_BOOK_DEFECTS, "Malformed book entries dropped");
    describe_counter!(METRIC_SCAN_FAILURES, "Scan cycles that could not fetch both books");
    describe_counter!(METRIC_MARKETS_FINALIZED, "Market instances finalized at expiry");

    debug!("Metrics initialized");
}

/// Install the Prometheus exporter on `0.0.0.0:port`.
pub fn install_exporter(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(addr = %addr, "Prometheus exporter listening");
    Ok(())
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Record order submission latency.
pub fn record_order_submit_latency(start: Instant) {
    histogram!(METRIC_ORDER_SUBMIT_LATENCY).record(elapsed_ms(start));
}

/// Record stream message processing latency.
pub fn record_ws_message_latency(start: Instant) {
    histogram!(METRIC_WS_MESSAGE_LATENCY).record(elapsed_ms(start));
}

/// Record opportunity detection latency.
pub fn record_opportunity_detection_latency(start: Instant) {
    histogram!(METRIC_OPPORTUNITY_DETECTION_LATENCY).record(elapsed_ms(start));
}

/// Record HTTP request latency.
pub fn record_http_latency(start: Instant, endpoint: &'static str) {
    histogram!(METRIC_HTTP_REQUEST_LATENCY, "endpoint" => endpoint).record(elapsed_ms(start));
}

/// Record order book fetch latency.
pub fn record_orderbook_fetch_latency(start: Instant) {
    histogram!(METRIC_ORDERBOOK_FETCH_LATENCY).record(elapsed_ms(start));
}

/// Increment order submitted counter.
pub fn inc_orders_submitted(count: u64) {
    counter!(METRIC_ORDERS_SUBMITTED).increment(count);
}

/// Increment orders filled counter.
pub fn inc_orders_filled(count: u64) {
    counter!(METRIC_ORDERS_FILLED).increment(count);
}

/// Increment orders failed counter.
pub fn inc_orders_failed(count: u64) {
    counter!(METRIC_ORDERS_FAILED).increment(count);
}

/// Increment opportunities detected counter.
pub fn inc_opportunities_detected() {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(1);
}

/// Increment opportunities executed counter.
pub fn inc_opportunities_executed() {
    counter!(METRIC_OPPORTUNITIES_EXECUTED).increment(1);
}

pub fn inc_unwinds() {
    counter!(METRIC_UNWINDS).increment(1);
}

pub fn inc_stranded() {
    counter!(METRIC_STRANDED).increment(1);
}

/// Increment stream messages received counter.
pub fn inc_ws_messages_received() {
    counter!(METRIC_WS_MESSAGES_RECEIVED).increment(1);
}

/// Increment stream reconnects counter.
pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

pub fn inc_ws_notifications_dropped() {
    counter!(METRIC_WS_NOTIFICATIONS_DROPPED).increment(1);
}

/// Add malformed book entries; zero is a no-op.
pub fn inc_book_defects(count: u64) {
    if count > 0 {
        counter!(METRIC_BOOK_DEFECTS).increment(count);
    }
}

pub fn inc_scan_failures() {
    counter!(METRIC_SCAN_FAILURES).increment(1);
}

pub fn inc_markets_finalized() {
    counter!(METRIC_MARKETS_FINALIZED).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        elapsed_ms(self.start)
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(elapsed_ms(self.start));
    }
}

/// Create a latency timer for signing operations.
pub fn timer_signing() -> LatencyTimer {
    LatencyTimer::new(METRIC_SIGNING_LATENCY)
}
