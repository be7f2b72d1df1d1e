//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub access_control: AccessControlConfig,
    pub monitoring: MonitoringConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    /// Bound on DNS resolution and each TCP connect attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Upper bound on the lifetime of one tunnel
    #[serde(with = "humantime_serde")]
    pub relay_timeout: Duration,
    /// Bound on reading the request head
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Answer unreachable/refused remotes with 502 instead of closing silently
    pub reply_on_unreachable: bool,
}

/// Access control configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessControlConfig {
    pub enabled: bool,
    pub default_policy: String,
    pub rules: Vec<AccessRule>,
}

/// Access control rule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessRule {
    pub pattern: String,
    pub action: String,
    pub ports: Option<Vec<u16>>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 1000,
            connect_timeout: Duration::from_secs(10),
            relay_timeout: Duration::from_secs(3600),
            handshake_timeout: Duration::from_secs(10),
            buffer_size: 8192,
            shutdown_timeout: Duration::from_secs(30),
            reply_on_unreachable: false,
        }
    }
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_policy: "allow".to_string(),
            rules: vec![],
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_addr: None,
        }
    }
}
