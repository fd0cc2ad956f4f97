//! Health check and statistics endpoints.

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::broker::BrokerStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub broker: BrokerHealthResponse,
    pub sessions: SessionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct BrokerHealthResponse {
    pub closed: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionHealthResponse {
    pub authenticated: usize,
    pub unique_users: usize,
    pub channels_count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub sessions: SessionStats,
    pub channels: ChannelStats,
    pub broker: BrokerStats,
}

#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub authenticated: usize,
    pub unique_users: usize,
}

#[derive(Debug, Serialize)]
pub struct ChannelStats {
    pub total: usize,
    /// channel id -> subscriber count
    pub subscribers: BTreeMap<String, usize>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let closed = state.broker.is_closed();
    let status = if closed { "shutting_down" } else { "healthy" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        broker: BrokerHealthResponse { closed },
        sessions: SessionHealthResponse {
            authenticated: state.hub_manager.session_count(),
            unique_users: state.hub_manager.user_count(),
            channels_count: state.hub.channel_count(),
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let manager_stats = state.hub_manager.stats();
    let hub_stats = state.hub.stats();

    Json(StatsResponse {
        sessions: SessionStats {
            authenticated: manager_stats.sessions,
            unique_users: manager_stats.users,
        },
        channels: ChannelStats {
            total: hub_stats.total_channels,
            subscribers: hub_stats.channels,
        },
        broker: state.broker.stats().await,
    })
}
