use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors raised by a single connection's transport.
///
/// Every variant is fatal for the connection it came from and for nothing else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Deadline exceeded")]
    Timeout,

    #[error("Message of {size} bytes exceeds read limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether this error is the ordinary end of a connection rather than a fault.
    pub fn is_expected_closure(&self) -> bool {
        matches!(self, TransportError::ConnectionClosed)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError};

        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed,
            WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
                TransportError::MessageTooLarge {
                    size,
                    limit: max_size,
                }
            }
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

impl From<axum::Error> for TransportError {
    fn from(err: axum::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

/// Unified error type for the hub
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Hub closed")]
    HubClosed,

    #[error("Upgrade failed: {0}")]
    UpgradeFailed(#[source] TransportError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

impl HubError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::HubClosed => StatusCode::SERVICE_UNAVAILABLE,

            HubError::UpgradeFailed(_) | HubError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            HubError::Transport(_) => StatusCode::BAD_GATEWAY,

            HubError::Io(_) | HubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
