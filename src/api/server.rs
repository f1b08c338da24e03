//! API server using Axum
//!
//! Serves the WebSocket endpoint next to the health and status routes.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ServerConfig;
use crate::error::{HubError, Result};
use crate::hub::Hub;

use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub started_at: Instant,
}

/// API server
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ServerConfig, hub: Hub) -> Self {
        Self {
            config,
            state: AppState {
                hub,
                started_at: Instant::now(),
            },
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until `shutdown` flips.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| HubError::InvalidConfig(format!("invalid listen address: {e}")))?;

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("API server listening on {}", listener.local_addr()?);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

        info!("API server shut down");
        Ok(())
    }
}
