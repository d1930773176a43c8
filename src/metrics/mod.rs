//! Prometheus metrics for live feed channels.
//!
//! - Consumer and state gauges per channel
//! - Transport attempts, opens, closes and scheduled retries
//! - Frame counters (received, dropped) and dropped sends

mod helpers;

pub use helpers::{encode_metrics, FeedMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "arena_feed";

lazy_static! {
    // ============================================================================
    // Channel Metrics
    // ============================================================================

    /// Attached consumers per channel
    pub static ref CHANNEL_CONSUMERS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_channel_consumers", METRIC_PREFIX),
        "Number of attached consumers per channel",
        &["channel"]
    ).unwrap();

    /// Connection state per channel (0=idle, 1=connecting, 2=open, 3=closing, 4=closed)
    pub static ref CHANNEL_STATE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_channel_state", METRIC_PREFIX),
        "Connection state per channel",
        &["channel"]
    ).unwrap();

    // ============================================================================
    // Transport Metrics
    // ============================================================================

    /// Transport open attempts
    pub static ref TRANSPORT_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_transport_attempts_total", METRIC_PREFIX),
        "Total transport open attempts",
        &["channel"]
    ).unwrap();

    /// Successful transport opens
    pub static ref TRANSPORT_OPENS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_transport_opens_total", METRIC_PREFIX),
        "Total successful transport opens",
        &["channel"]
    ).unwrap();

    /// Transport closes by cause (failed, dropped, teardown)
    pub static ref TRANSPORT_CLOSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_transport_closes_total", METRIC_PREFIX),
        "Total transport closes",
        &["channel", "cause"]
    ).unwrap();

    /// Retries scheduled after a failure
    pub static ref RECONNECTS_SCHEDULED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_reconnects_scheduled_total", METRIC_PREFIX),
        "Total reconnection attempts scheduled",
        &["channel"]
    ).unwrap();

    /// Times a channel ran out of retries
    pub static ref RECONNECT_EXHAUSTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_reconnect_exhausted_total", METRIC_PREFIX),
        "Total times a channel exhausted its reconnection attempts",
        &["channel"]
    ).unwrap();

    // ============================================================================
    // Frame Metrics
    // ============================================================================

    /// Inbound frames dispatched to handlers
    pub static ref FRAMES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Total inbound frames dispatched",
        &["channel"]
    ).unwrap();

    /// Inbound frames dropped because they could not be decoded
    pub static ref FRAMES_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_dropped_total", METRIC_PREFIX),
        "Total inbound frames dropped",
        &["channel"]
    ).unwrap();

    /// Outbound sends dropped (not connected, encode or transport failure)
    pub static ref SENDS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_sends_dropped_total", METRIC_PREFIX),
        "Total outbound sends dropped",
        &["channel", "reason"]
    ).unwrap();
}
