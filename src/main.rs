//! wshub server - Entry Point
//!
//! Starts the hub, its HTTP surface and the announcer with graceful shutdown support.

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wshub::api::ApiServer;
use wshub::config::{Config, LogConfig};
use wshub::hub::Hub;
use wshub::services::{Announcer, AnnouncerHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.log);

    info!("Starting wshub");

    let hub = Hub::new(config.hub.clone(), None);
    info!(
        read_limit = hub.read_limit(),
        ping_interval = ?hub.ping_interval(),
        "Hub created"
    );

    // Start announcer
    let (announcer_handle, announcer_shutdown) = AnnouncerHandle::new();
    let announcer_task = Announcer::from_config(hub.clone(), &config.announce).map(|announcer| {
        tokio::spawn(async move {
            announcer.run(announcer_shutdown).await;
        })
    });

    // Start API server
    let (shutdown_tx, api_shutdown) = watch::channel(false);
    let api_server = ApiServer::new(config.server.clone(), hub.clone());
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("Server started on {}", config.server_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Close clients first; upgrades are refused from here on
    announcer_handle.shutdown();
    hub.shutdown().await;
    let _ = shutdown_tx.send(true);

    if let Some(task) = announcer_task {
        let _ = task.await;
    }
    let _ = api_task.await;

    info!("wshub stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("wshub={},tower_http=info", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
