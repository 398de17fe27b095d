//! Trainyard Server - Main entry point

use std::sync::Arc;

use trainyard_core::{
    api::{self, AppState},
    config::Config,
    jobs::JobEngine,
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match std::env::var("TRAINYARD_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Could not load config: {}. Using defaults.", e);
            Config::default()
        }),
    };

    let telemetry = telemetry::init_telemetry(&config.telemetry)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        max_concurrent_jobs = config.engine.max_concurrent_jobs,
        max_queue_depth = config.engine.max_queue_depth,
        "Starting Trainyard server"
    );

    let engine = Arc::new(JobEngine::with_builtin(config.engine.clone())?);
    let sweeper = engine.spawn_retention_sweeper();

    let app = api::build_router(AppState::new(engine.clone(), telemetry.metrics.clone()));

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Starting HTTP server");

    // Event streams end when the engine shuts down.
    let draining = engine.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if !draining.shutdown().await {
                tracing::warn!("Some jobs were still running when the shutdown timeout elapsed");
            }
        })
        .await?;

    // Cleanup
    sweeper.abort();
    telemetry.shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
