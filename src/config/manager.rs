//! Configuration Manager

use super::Config;
use crate::events::PayloadFormat;
use crate::protocol::MIN_STARTUP_LENGTH;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file, layered over `PGSNIFF_*` environment variables
    pub fn load_from_file(path: &Path) -> Result<Config> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Defaults, then environment values from `lookup`, then the file on top.
    ///
    /// A missing file leaves the environment layer as the result.
    pub fn load_with_env<F>(path: &Path, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.apply_env(lookup)?;

        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let file: toml::Table = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config = config
                .overlay(file)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
        }

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }
}

/// Replace values in `base` with those present in `overlay`, section by section
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(section) = value {
            if let Some(toml::Value::Table(base_section)) = base.get_mut(&key) {
                merge_tables(base_section, section);
                continue;
            }
            base.insert(key, toml::Value::Table(section));
        } else {
            base.insert(key, value);
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen: Option<String>,
    pub upstream: Option<String>,
    pub tls: bool,
    pub payload_format: Option<PayloadFormat>,
    pub log_level: Option<String>,
}

impl Config {
    /// Apply the fields a TOML document sets on top of this configuration
    pub fn overlay(self, file: toml::Table) -> Result<Config> {
        let toml::Value::Table(mut merged) =
            toml::Value::try_from(&self).context("Failed to serialize configuration")?
        else {
            bail!("Configuration did not serialize to a table");
        };
        merge_tables(&mut merged, file);
        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Override fields from environment-style lookups
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen_addr) = lookup("PGSNIFF_LISTEN_ADDR") {
            self.proxy.listen_addr = listen_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid PGSNIFF_LISTEN_ADDR: {}", listen_addr))?;
        }

        if let Some(upstream_addr) = lookup("PGSNIFF_UPSTREAM_ADDR") {
            self.proxy.upstream_addr = upstream_addr;
        }

        if let Some(tls) = lookup("PGSNIFF_TLS") {
            self.proxy.tls = tls
                .parse::<bool>()
                .with_context(|| format!("Invalid PGSNIFF_TLS: {}", tls))?;
        }

        if let Some(buffer_size) = lookup("PGSNIFF_BUFFER_SIZE") {
            self.proxy.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid PGSNIFF_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Some(timeout) = lookup("PGSNIFF_SHUTDOWN_TIMEOUT") {
            self.proxy.shutdown_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid PGSNIFF_SHUTDOWN_TIMEOUT: {}", timeout))?;
        }

        if let Some(log_level) = lookup("PGSNIFF_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        if let Some(format) = lookup("PGSNIFF_PAYLOAD_FORMAT") {
            self.logging.payload_format = <PayloadFormat as clap::ValueEnum>::from_str(&format, true)
                .map_err(|e| anyhow::anyhow!("Invalid PGSNIFF_PAYLOAD_FORMAT: {}", e))?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_proxy_config()
            .with_context(|| "Proxy configuration validation failed")?;

        self.validate_decoder_config()
            .with_context(|| "Decoder configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_proxy_config(&self) -> Result<()> {
        let upstream = self.proxy.upstream_addr.trim();
        match upstream.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => bail!("upstream_addr must be host:port, got '{}'", self.proxy.upstream_addr),
        }

        if self.proxy.buffer_size < 512 {
            bail!("buffer_size must be at least 512 bytes");
        }

        if self.proxy.buffer_size > 1_048_576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_decoder_config(&self) -> Result<()> {
        if self.decoder.max_message_size < MIN_STARTUP_LENGTH as usize {
            bail!("max_message_size must be at least {} bytes", MIN_STARTUP_LENGTH);
        }

        if self.decoder.max_message_size > u32::MAX as usize {
            bail!("max_message_size cannot exceed the 32-bit length field");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        if self.monitoring.enabled && self.monitoring.metrics_addr.is_none() {
            bail!("monitoring.metrics_addr is required when monitoring is enabled");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(&mut self, cli: &CliOverrides) -> Result<()> {
        if let Some(listen) = &cli.listen {
            self.proxy.listen_addr = parse_listen_addr(listen)?;
            tracing::info!("CLI override: listen address set to {}", self.proxy.listen_addr);
        }

        if let Some(upstream) = &cli.upstream {
            self.proxy.upstream_addr = upstream.clone();
            tracing::info!("CLI override: upstream address set to {}", upstream);
        }

        if cli.tls {
            self.proxy.tls = true;
            tracing::info!("CLI override: TLS negotiation enabled");
        }

        if let Some(format) = cli.payload_format {
            self.logging.payload_format = format;
        }

        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }

        Ok(())
    }
}

/// Accepts `host:port` as well as the `:port` shorthand for all interfaces
fn parse_listen_addr(value: &str) -> Result<SocketAddr> {
    let value = value.trim();
    if let Some(port) = value.strip_prefix(':') {
        let port = port
            .parse::<u16>()
            .with_context(|| format!("Invalid listen port: {}", value))?;
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    value
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid listen address: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.proxy.listen_addr.port(), 5434);
        assert_eq!(config.proxy.upstream_addr, "127.0.0.1:5433");
        assert!(!config.proxy.tls);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PGSNIFF_LISTEN_ADDR", "127.0.0.1:6543"),
            ("PGSNIFF_UPSTREAM_ADDR", "db.internal:5432"),
            ("PGSNIFF_TLS", "true"),
            ("PGSNIFF_SHUTDOWN_TIMEOUT", "3s"),
            ("PGSNIFF_PAYLOAD_FORMAT", "hex"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.proxy.listen_addr, "127.0.0.1:6543".parse().unwrap());
        assert_eq!(config.proxy.upstream_addr, "db.internal:5432");
        assert!(config.proxy.tls);
        assert_eq!(config.proxy.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.logging.payload_format, PayloadFormat::Hex);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "PGSNIFF_TLS").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PGSNIFF_TLS"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = Config::default();
        config
            .merge_with_cli_args(&CliOverrides {
                listen: Some(":7000".to_string()),
                upstream: Some("10.0.0.5:5432".to_string()),
                tls: true,
                payload_format: Some(PayloadFormat::Base64),
                log_level: Some("debug".to_string()),
            })
            .unwrap();

        assert_eq!(config.proxy.listen_addr, "0.0.0.0:7000".parse().unwrap());
        assert_eq!(config.proxy.upstream_addr, "10.0.0.5:5432");
        assert!(config.proxy.tls);
        assert_eq!(config.logging.payload_format, PayloadFormat::Base64);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.proxy.upstream_addr = "localhost".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.decoder.max_message_size = 4;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitoring.enabled = true;
        assert!(config.validate().is_err());
    }
}
