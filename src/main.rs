use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use volunteer_gateway::config::Settings;
use volunteer_gateway::server::{create_app, AppState};
use volunteer_gateway::shutdown::GracefulShutdown;
use volunteer_gateway::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Keep the guard alive until exit so pending spans are flushed
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let state = AppState::new(settings.clone()).await?;
    let pump = state.start_event_pump().await;
    tracing::info!("Application state initialized");

    let shutdown = GracefulShutdown::new(&state);
    let app = create_app(state.clone());

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(state.shutdown.clone()))
        .await?;

    let result = shutdown.execute(Some(pump)).await;
    if !result.is_clean() {
        tracing::warn!(?result, "Shutdown finished with leftovers");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Upgraded WebSocket connections are not tracked by the server; close them here
    token.cancel();
}
