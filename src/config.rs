use crate::error::{HubError, Result};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Hub timing and limits
    pub hub: HubConfig,
    /// Periodic server announcement
    pub announce: AnnounceConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port for the HTTP/WebSocket server (default: 8080)
    pub port: u16,
}

/// Initial hub settings. Timing values stay adjustable at runtime through the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Deadline for a single transport write
    pub write_wait: Duration,
    /// How long a peer may stay silent on pings before it is dropped
    pub pong_wait: Duration,
    /// Maximum size of an inbound message in bytes
    pub read_limit: usize,
    /// Capacity of the command queue feeding the registry consumer
    pub command_queue: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            read_limit: 512,
            command_queue: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceConfig {
    /// Interval between announcements; `None` disables the announcer
    pub interval: Option<Duration>,
    /// Payload broadcast on every tick
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = HubConfig::default();

        let command_queue: usize = parse_env("WSHUB_COMMAND_QUEUE", "1")?;
        if command_queue == 0 {
            return Err(HubError::InvalidConfig(
                "WSHUB_COMMAND_QUEUE must be at least 1".into(),
            ));
        }

        let announce_secs: u64 = parse_env("WSHUB_ANNOUNCE_INTERVAL_SECS", "0")?;

        Ok(Config {
            server: ServerConfig {
                host: get_env_or("WSHUB_HOST", "0.0.0.0"),
                port: get_env_or("WSHUB_PORT", "8080").parse().map_err(|_| {
                    HubError::InvalidConfig("WSHUB_PORT must be a valid port number".into())
                })?,
            },
            hub: HubConfig {
                write_wait: Duration::from_secs(parse_env(
                    "WSHUB_WRITE_WAIT_SECS",
                    &defaults.write_wait.as_secs().to_string(),
                )?),
                pong_wait: Duration::from_secs(parse_env(
                    "WSHUB_PONG_WAIT_SECS",
                    &defaults.pong_wait.as_secs().to_string(),
                )?),
                read_limit: parse_env("WSHUB_READ_LIMIT", &defaults.read_limit.to_string())?,
                command_queue,
            },
            announce: AnnounceConfig {
                interval: (announce_secs > 0).then(|| Duration::from_secs(announce_secs)),
                message: get_env_or("WSHUB_ANNOUNCE_MESSAGE", "Server says Hi!"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| HubError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
