//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_LISTEN_PORT, DEFAULT_MAX_FRAME_LENGTH,
    DEFAULT_TARGET_PORT,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
    pub monitoring: MonitoringConfig,
}

/// Listening side of the relay
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Service the relay forwards to
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub target_host: String,
    pub target_port: u16,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// Frame size limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_frame_length: u32,
}

/// Log output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for the rotated log file; console only when unset
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

/// Monitoring HTTP endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// `host:port` the broker listens on
    pub fn listen_address(&self) -> String {
        format_host_port(&self.server.host, self.server.port)
    }

    /// `target_host:target_port` of the upstream service
    pub fn target_address(&self) -> String {
        format_host_port(&self.upstream.target_host, self.upstream.target_port)
    }
}

/// Join host and port, bracketing bare IPv6 literals
pub fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_LISTEN_PORT,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            target_host: "127.0.0.1".to_string(),
            target_port: DEFAULT_TARGET_PORT,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_name: "framerelay.log".to_string(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}
