//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;
use std::time::Duration;

/// Manages configuration loading and validation
pub struct ConfigManager;

/// Values supplied on the command line; `None` leaves the loaded value alone
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub target_host: Option<String>,
    pub target_port: Option<u16>,
    pub max_frame_length: Option<u32>,
    pub log_level: Option<String>,
}

impl ConfigManager {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from `FRAMERELAY_*` environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Overlay environment values read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("FRAMERELAY_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("FRAMERELAY_PORT") {
            self.server.port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid FRAMERELAY_PORT: {}", port))?;
        }

        if let Some(host) = lookup("FRAMERELAY_TARGET_HOST") {
            self.upstream.target_host = host;
        }

        if let Some(port) = lookup("FRAMERELAY_TARGET_PORT") {
            self.upstream.target_port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid FRAMERELAY_TARGET_PORT: {}", port))?;
        }

        if let Some(timeout) = lookup("FRAMERELAY_CONNECT_TIMEOUT") {
            self.upstream.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid FRAMERELAY_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Some(max) = lookup("FRAMERELAY_MAX_FRAME_LENGTH") {
            self.limits.max_frame_length = max
                .parse::<u32>()
                .with_context(|| format!("Invalid FRAMERELAY_MAX_FRAME_LENGTH: {}", max))?;
        }

        if let Some(level) = lookup("FRAMERELAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_upstream_config()
            .with_context(|| "Upstream configuration validation failed")?;

        if self.limits.max_frame_length == 0 {
            bail!("limits.max_frame_length must be greater than 0");
        }

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    // server.port may be 0: the OS picks an ephemeral port at bind time
    fn validate_server_config(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            bail!("server.host must not be empty");
        }

        if self.server.shutdown_timeout.is_zero() {
            bail!("server.shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_upstream_config(&self) -> Result<()> {
        if self.upstream.target_host.trim().is_empty() {
            bail!("upstream.target_host must not be empty");
        }

        if self.upstream.target_port == 0 {
            bail!("upstream.target_port must be greater than 0");
        }

        if self.upstream.connect_timeout.is_zero() {
            bail!("upstream.connect_timeout must be greater than 0");
        }

        if self.upstream.connect_timeout > Duration::from_secs(300) {
            bail!("upstream.connect_timeout cannot exceed 5 minutes");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "logging.level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        if self.logging.directory.is_some() && self.logging.file_name.trim().is_empty() {
            bail!("logging.file_name must not be empty when logging.directory is set");
        }

        Ok(())
    }

    /// Merge with CLI arguments (highest priority)
    pub fn merge_with_cli_args(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
            tracing::info!("CLI override: listen host set to {}", host);
        }

        // Port 0 asks the OS for an ephemeral port
        if let Some(port) = overrides.port {
            self.server.port = port;
            tracing::info!("CLI override: listen port set to {}", port);
        }

        if let Some(host) = &overrides.target_host {
            self.upstream.target_host = host.clone();
            tracing::info!("CLI override: target host set to {}", host);
        }

        if let Some(port) = overrides.target_port {
            self.upstream.target_port = port;
            tracing::info!("CLI override: target port set to {}", port);
        }

        if let Some(max) = overrides.max_frame_length {
            self.limits.max_frame_length = max;
            tracing::info!("CLI override: max frame length set to {} bytes", max);
        }

        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }
}
