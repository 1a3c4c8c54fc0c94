mod api;
mod bootstrap;
mod health;
mod notifications;
mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reserva_core::config::{AppConfig, LoadOptions};
use tokio_util::sync::CancellationToken;

fn init_logging(config: &AppConfig) {
    use reserva_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let cancel = CancellationToken::new();

    let sweeper = sweeper::spawn(
        Arc::clone(&app.engine),
        Duration::from_secs(app.config.workflow.sweep_interval_secs),
        app.config.workflow.sweep_on_startup,
        cancel.clone(),
    );

    let routes = api::router(api::ApiState::new(
        Arc::clone(&app.engine),
        app.hub.clone(),
        Arc::clone(&app.config),
    ))
    .merge(health::router(app.db_pool.clone(), app.hub.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "reserva-server listening"
    );

    axum::serve(listener, routes).with_graceful_shutdown(wait_for_shutdown(cancel.clone())).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "reserva-server stopping"
    );
    cancel.cancel();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, sweeper).await.is_err() {
        tracing::warn!(
            event_name = "system.server.sweeper_shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "sweeper did not stop within the grace period"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                tracing::error!(
                    event_name = "system.server.signal_error",
                    correlation_id = "shutdown",
                    error = %error,
                    "failed to listen for shutdown signal"
                );
            }
        }
        () = cancel.cancelled() => {}
    }
}
