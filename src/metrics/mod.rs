//! Prometheus metrics for the realtime gateway.
//!
//! - Session metrics (open sessions, authenticated sessions, close codes)
//! - Hub metrics (active channels, routed events)
//! - Broker metrics (published events, dropped deliveries)
//! - Ingest metrics (rejected domain events)

mod helpers;

pub use helpers::{encode_metrics, BrokerMetrics, EventMetrics, SessionMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "volunteer_gateway";

lazy_static! {
    // ============================================================================
    // Session Metrics
    // ============================================================================

    /// Live WebSocket sessions, authenticated or not
    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_sessions_active", METRIC_PREFIX),
        "Number of live WebSocket sessions"
    ).unwrap();

    /// Sessions registered with the hub manager
    pub static ref SESSIONS_AUTHENTICATED: IntGauge = register_int_gauge!(
        format!("{}_sessions_authenticated", METRIC_PREFIX),
        "Number of authenticated WebSocket sessions"
    ).unwrap();

    /// Unique users with at least one live session
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of unique connected users"
    ).unwrap();

    pub static ref SESSIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_sessions_opened_total", METRIC_PREFIX),
        "Total WebSocket sessions opened"
    ).unwrap();

    /// Sessions closed, by close code
    pub static ref SESSIONS_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_sessions_closed_total", METRIC_PREFIX),
        "Total WebSocket sessions closed by close code",
        &["code"]
    ).unwrap();

    pub static ref SESSION_DURATION: Histogram = register_histogram!(
        format!("{}_session_duration_seconds", METRIC_PREFIX),
        "WebSocket session duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0, 86400.0]
    ).unwrap();

    pub static ref FRAMES_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_sent_total", METRIC_PREFIX),
        "Total frames written to WebSocket connections"
    ).unwrap();

    pub static ref HEARTBEATS_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeats_received_total", METRIC_PREFIX),
        "Total Heartbeat frames received from clients"
    ).unwrap();

    // ============================================================================
    // Hub Metrics
    // ============================================================================

    /// Hub channels with at least one subscriber
    pub static ref CHANNELS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_channels_active", METRIC_PREFIX),
        "Number of hub channels with at least one subscriber"
    ).unwrap();

    /// Events handed to the hub for fanout, by event name
    pub static ref EVENTS_ROUTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_routed_total", METRIC_PREFIX),
        "Total domain events routed into hub channels",
        &["event"]
    ).unwrap();

    // ============================================================================
    // Broker Metrics
    // ============================================================================

    pub static ref BROKER_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broker_published_total", METRIC_PREFIX),
        "Total events published on the broker",
        &["stream"]
    ).unwrap();

    /// Deliveries dropped because a subscriber queue was full
    pub static ref BROKER_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broker_dropped_total", METRIC_PREFIX),
        "Total broker deliveries dropped due to a full subscriber queue",
        &["stream"]
    ).unwrap();

    // ============================================================================
    // Ingest Metrics
    // ============================================================================

    pub static ref EVENTS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_rejected_total", METRIC_PREFIX),
        "Total domain events rejected at the bus boundary",
        &["name"]
    ).unwrap();
}
