//! Metrics helper for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::feed::ConnectionState;

use super::{
    CHANNEL_CONSUMERS, CHANNEL_STATE, FRAMES_DROPPED_TOTAL, FRAMES_RECEIVED_TOTAL,
    RECONNECTS_SCHEDULED_TOTAL, RECONNECT_EXHAUSTED_TOTAL, SENDS_DROPPED_TOTAL,
    TRANSPORT_ATTEMPTS_TOTAL, TRANSPORT_CLOSES_TOTAL, TRANSPORT_OPENS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording channel metrics
pub struct FeedMetrics;

impl FeedMetrics {
    pub fn set_consumers(channel: &str, count: usize) {
        CHANNEL_CONSUMERS
            .with_label_values(&[channel])
            .set(count as i64);
    }

    pub fn set_state(channel: &str, state: ConnectionState) {
        CHANNEL_STATE
            .with_label_values(&[channel])
            .set(state.as_gauge());
    }

    pub fn record_attempt(channel: &str) {
        TRANSPORT_ATTEMPTS_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn record_open(channel: &str) {
        TRANSPORT_OPENS_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a transport that ended; `cause` is "failed", "dropped" or "teardown"
    pub fn record_close(channel: &str, cause: &str) {
        TRANSPORT_CLOSES_TOTAL
            .with_label_values(&[channel, cause])
            .inc();
    }

    pub fn record_reconnect_scheduled(channel: &str) {
        RECONNECTS_SCHEDULED_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn record_exhausted(channel: &str) {
        RECONNECT_EXHAUSTED_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn record_frame(channel: &str) {
        FRAMES_RECEIVED_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn record_frame_dropped(channel: &str) {
        FRAMES_DROPPED_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a dropped send; `reason` is "not_connected", "encode" or "transport"
    pub fn record_send_dropped(channel: &str, reason: &str) {
        SENDS_DROPPED_TOTAL
            .with_label_values(&[channel, reason])
            .inc();
    }
}
