//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    BROKER_DROPPED_TOTAL, BROKER_PUBLISHED_TOTAL, EVENTS_REJECTED_TOTAL, EVENTS_ROUTED_TOTAL,
    FRAMES_SENT_TOTAL, HEARTBEATS_RECEIVED_TOTAL, SESSIONS_ACTIVE, SESSIONS_CLOSED_TOTAL,
    SESSIONS_OPENED_TOTAL, SESSION_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct SessionMetrics;

impl SessionMetrics {
    pub fn record_opened() {
        SESSIONS_OPENED_TOTAL.inc();
        SESSIONS_ACTIVE.inc();
    }

    pub fn record_closed(code: u16, duration_secs: f64) {
        SESSIONS_ACTIVE.dec();
        SESSIONS_CLOSED_TOTAL
            .with_label_values(&[&code.to_string()])
            .inc();
        SESSION_DURATION.observe(duration_secs);
    }

    pub fn record_frame_sent() {
        FRAMES_SENT_TOTAL.inc();
    }

    pub fn record_heartbeat() {
        HEARTBEATS_RECEIVED_TOTAL.inc();
    }
}

pub struct BrokerMetrics;

impl BrokerMetrics {
    pub fn record_published(stream: &str) {
        BROKER_PUBLISHED_TOTAL.with_label_values(&[stream]).inc();
    }

    pub fn record_dropped(stream: &str) {
        BROKER_DROPPED_TOTAL.with_label_values(&[stream]).inc();
    }
}

pub struct EventMetrics;

impl EventMetrics {
    pub fn record_rejected(name: &str) {
        EVENTS_REJECTED_TOTAL.with_label_values(&[name]).inc();
    }

    pub fn record_routed(event: &str) {
        EVENTS_ROUTED_TOTAL.with_label_values(&[event]).inc();
    }
}
