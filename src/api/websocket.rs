//! WebSocket upgrade endpoint
//!
//! Each upgraded socket becomes a hub client built by the hub's factory.

use std::net::SocketAddr;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::error::HubError;
use crate::transport::{Connection, RequestMeta, Upgraded};

/// `GET /ws`
///
/// Refused with 503 once the hub is shutting down, before any handshake.
pub async fn ws_handler(
    State(state): State<AppState>,
    uri: Uri,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.hub.is_shutting_down() {
        return HubError::HubClosed.into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(error = %rejection, "Rejected WebSocket request");
            return rejection.into_response();
        }
    };

    let meta = RequestMeta::from_target(
        &uri.to_string(),
        connect_info.map(|ConnectInfo(addr)| addr),
    );
    let hub = state.hub.clone();

    ws.max_message_size(hub.read_limit())
        .on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let upgraded = Upgraded::new(Connection::from(socket), meta);
            if let Err(e) = hub.accept(upgraded).await {
                debug!(error = %e, "Dropping connection");
            }
        })
}
