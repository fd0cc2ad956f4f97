//! Prometheus metrics endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::metrics;
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Resync gauges that are otherwise maintained incrementally
fn update_metrics_from_state(state: &AppState) {
    metrics::USERS_CONNECTED.set(state.hub_manager.user_count() as i64);
    metrics::SESSIONS_AUTHENTICATED.set(state.hub_manager.session_count() as i64);
    metrics::CHANNELS_ACTIVE.set(state.hub.channel_count() as i64);
}
