//! HTTP surface of the hub
//!
//! Upgrades `GET /ws` into hub clients and reports health and status.

pub mod handlers;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{ApiServer, AppState};
