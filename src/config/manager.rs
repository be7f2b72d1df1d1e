//! Configuration Manager

use super::Config;
use crate::routing::{Action, Policy};
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config = Self::load_from_str(&content)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn load_from_str(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("TUNNELPROXY_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid TUNNELPROXY_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(max_conn) = std::env::var("TUNNELPROXY_MAX_CONNECTIONS") {
            config.server.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid TUNNELPROXY_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(timeout) = std::env::var("TUNNELPROXY_CONNECT_TIMEOUT") {
            config.server.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid TUNNELPROXY_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(buffer_size) = std::env::var("TUNNELPROXY_BUFFER_SIZE") {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid TUNNELPROXY_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(log_level) = std::env::var("TUNNELPROXY_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .context("Server configuration validation failed")?;

        self.validate_access_control_config()
            .context("Access control configuration validation failed")?;

        self.validate_monitoring_config()
            .context("Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate server configuration
    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.max_connections > 100000 {
            bail!("max_connections cannot exceed 100,000 for safety");
        }

        if self.server.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }

        if self.server.relay_timeout.is_zero() {
            bail!("relay_timeout must be greater than 0");
        }

        if self.server.handshake_timeout.is_zero() {
            bail!("handshake_timeout must be greater than 0");
        }

        if self.server.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.server.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    /// Validate access control configuration
    fn validate_access_control_config(&self) -> Result<()> {
        if Policy::parse(&self.access_control.default_policy).is_none() {
            bail!("access_control.default_policy must be 'allow' or 'block'");
        }

        for (i, rule) in self.access_control.rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                bail!("Access rule {} has empty pattern", i);
            }

            if Action::parse(&rule.action).is_none() {
                bail!("Access rule {} action must be 'allow' or 'block'", i);
            }

            if let Some(ports) = &rule.ports {
                if ports.contains(&0) {
                    bail!("Access rule {} contains invalid port 0", i);
                }
            }
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_connections: Option<usize>,
        timeout: Option<u64>,
        buffer_size: Option<usize>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(max_conn) = max_connections {
            self.server.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        if let Some(timeout_secs) = timeout {
            self.server.connect_timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: connect timeout set to {}s", timeout_secs);
        }

        if let Some(buffer_size) = buffer_size {
            self.server.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }
    }
}
