//! wshub - WebSocket connection hub
//!
//! Registers upgraded WebSocket connections, fans messages out to all or
//! some of them and tears everything down cleanly on shutdown.
//!
//! ## Features
//!
//! - Registry owned by a single task; every mutation is a queued command
//! - Per-connection reader and writer pumps with ping/pong keepalive
//! - Runtime-adjustable deadlines and message size limit
//! - Pluggable client factories and custom client types
//! - Adapters for axum, tokio-tungstenite and an in-memory loopback

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod services;
pub mod transport;

pub use client::{Client, ClientFactory, ClientId, Socket};
pub use config::Config;
pub use error::{HubError, Result, TransportError};
pub use hub::Hub;
