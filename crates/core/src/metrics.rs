//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "auctions_discovered_total",
        "Total number of auction instances discovered through the factory"
    );
    describe_gauge!(
        "subscriptions_active",
        "Number of auction instances currently watched"
    );
    describe_counter!(
        "events_processed_total",
        "Total number of auction events applied to the store"
    );
    describe_counter!(
        "event_errors_total",
        "Total number of auction events that failed to apply"
    );
    describe_counter!(
        "decode_errors_total",
        "Total number of logs that matched a known topic but failed to decode"
    );
    describe_counter!(
        "subscription_reconnects_total",
        "Total number of reconnect attempts on lost log subscriptions"
    );
    describe_counter!(
        "notifications_created_total",
        "Total number of notifications written"
    );
    describe_histogram!(
        "event_processing_duration_seconds",
        "Time taken to apply one auction event in seconds"
    );
}

/// Record a discovered auction instance.
pub fn record_auction_discovered() {
    counter!("auctions_discovered_total").increment(1);
}

/// Record a change in the number of watched instances.
pub fn record_subscription_started() {
    gauge!("subscriptions_active").increment(1.0);
}

/// Record a watcher task that stopped.
pub fn record_subscription_stopped() {
    gauge!("subscriptions_active").decrement(1.0);
}

/// Record a successfully applied auction event.
///
/// # Arguments
/// * `kind` - The event kind name (e.g. "commitment_made")
pub fn record_event_processed(kind: &str) {
    counter!("events_processed_total", "kind" => kind.to_string()).increment(1);
}

/// Record an auction event that failed to apply.
///
/// # Arguments
/// * `kind` - The event kind name
pub fn record_event_error(kind: &str) {
    counter!("event_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Record a log decode error.
///
/// # Arguments
/// * `context` - Where the log came from ("factory" or "auction")
pub fn record_decode_error(context: &str) {
    counter!("decode_errors_total", "context" => context.to_string()).increment(1);
}

/// Record a reconnect attempt on a lost subscription.
///
/// # Arguments
/// * `stream` - Which subscription dropped ("factory" or "auction")
pub fn record_subscription_reconnect(stream: &str) {
    counter!("subscription_reconnects_total", "stream" => stream.to_string()).increment(1);
}

/// Record written notifications.
///
/// # Arguments
/// * `count` - Number of notifications in the batch
pub fn record_notifications_created(count: u64) {
    counter!("notifications_created_total").increment(count);
}

/// Record event processing duration.
pub fn record_event_processing_duration(duration_secs: f64) {
    histogram!("event_processing_duration_seconds").record(duration_secs);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_event_processing_duration(duration);
    }
}
