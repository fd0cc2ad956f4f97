//! Graceful shutdown of the gateway.
//!
//! Cancelling the root token closes every live session with `1001`, then the
//! broker is closed so the message pump drains and exits. The sequence waits
//! a bounded time for sessions to finish their teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::events::BusEvent;
use crate::hub::Hub;
use crate::hub_manager::HubManager;
use crate::metrics::SESSIONS_ACTIVE;
use crate::server::AppState;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for sessions to tear down
    pub drain_timeout: Duration,
    /// Time to wait for the message pump to exit
    pub pump_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            pump_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Sessions registered when shutdown started
    pub sessions_at_start: usize,
    /// Sessions still registered when the drain finished or timed out
    pub sessions_remaining: usize,
    pub channels_remaining: usize,
    pub pump_stopped: bool,
    pub duration: Duration,
}

impl ShutdownResult {
    pub fn is_clean(&self) -> bool {
        self.sessions_remaining == 0 && self.channels_remaining == 0 && self.pump_stopped
    }
}

pub struct GracefulShutdown {
    token: CancellationToken,
    broker: Arc<Broker<BusEvent>>,
    hub: Arc<Hub>,
    hub_manager: Arc<HubManager>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(state: &AppState) -> Self {
        Self::with_config(state, ShutdownConfig::default())
    }

    pub fn with_config(state: &AppState, config: ShutdownConfig) -> Self {
        Self {
            token: state.shutdown.clone(),
            broker: state.broker.clone(),
            hub: state.hub.clone(),
            hub_manager: state.hub_manager.clone(),
            config,
        }
    }

    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self, pump),
        fields(sessions = self.hub_manager.session_count())
    )]
    pub async fn execute(&self, pump: Option<JoinHandle<()>>) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult {
            sessions_at_start: self.hub_manager.session_count(),
            ..Default::default()
        };

        tracing::info!("Closing sessions");
        self.token.cancel();

        tracing::info!("Closing event broker");
        self.broker.close().await;

        result.pump_stopped = match pump {
            Some(handle) => timeout(self.config.pump_timeout, handle).await.is_ok(),
            None => true,
        };
        if !result.pump_stopped {
            tracing::warn!("Message pump did not stop in time");
        }

        self.wait_for_sessions().await;

        result.sessions_remaining = self.hub_manager.session_count();
        result.channels_remaining = self.hub.channel_count();
        result.duration = start.elapsed();

        if result.sessions_remaining > 0 {
            tracing::warn!(
                remaining_sessions = result.sessions_remaining,
                "Some sessions did not close gracefully"
            );
        }

        tracing::info!(
            sessions_at_start = result.sessions_at_start,
            channels_remaining = result.channels_remaining,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    async fn wait_for_sessions(&self) {
        let drained = async {
            loop {
                let done = self.hub_manager.session_count() == 0
                    && self.hub.channel_count() == 0
                    && SESSIONS_ACTIVE.get() <= 0;
                if done {
                    break;
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        let _ = timeout(self.config.drain_timeout, drained).await;
    }
}
