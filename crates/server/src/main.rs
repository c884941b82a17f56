mod api;
mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::{Context, Result};
use airloop_core::config::{AppConfig, LoadOptions};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use airloop_core::config::LogFormat::*;
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
    let agents = app.runtime.registry().agents().count();
    let router = Router::new()
        .merge(api::router(app.runtime.clone()))
        .merge(health::router(app.db_pool.clone(), agents));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener =
        TcpListener::bind(&address).await.with_context(|| format!("could not bind {address}"))?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        session_id = "unknown",
        bind_address = %address,
        "airloop-server listening"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    let shutdown_requested = tokio::select! {
        joined = &mut server => {
            joined.context("server task panicked")??;
            false
        }
        () = wait_for_shutdown() => true,
    };

    if shutdown_requested {
        let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(grace, server).await {
            Ok(joined) => joined.context("server task panicked")??,
            Err(_) => tracing::warn!(
                event_name = "system.server.drain_timeout",
                correlation_id = "shutdown",
                session_id = "unknown",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish within the shutdown window"
            ),
        }
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        session_id = "unknown",
        "airloop-server stopping"
    );
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            session_id = "unknown",
            error = %error,
            "could not listen for the shutdown signal"
        );
    }
}
