//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::events::{EventFormat, PayloadFormat};
use crate::protocol::{DecoderOptions, DEFAULT_MAX_MESSAGE_SIZE};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub decoder: DecoderConfig,
    pub logging: LoggingConfig,
    pub monitoring: MonitoringConfig,
}

/// Listener and upstream settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    /// `host:port`, resolved each time a client is accepted
    pub upstream_addr: String,
    /// Must match whether the upstream negotiates TLS
    pub tls: bool,
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Framing limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub max_message_size: usize,
}

/// Log output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub payload_format: PayloadFormat,
    pub event_format: EventFormat,
    /// Payload bytes rendered per event, 0 for no limit
    pub max_payload_display: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            tls: self.proxy.tls,
            max_message_size: self.decoder.max_message_size,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5434)),
            upstream_addr: "127.0.0.1:5433".to_string(),
            tls: false,
            buffer_size: 8192,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            payload_format: PayloadFormat::Text,
            event_format: EventFormat::Text,
            max_payload_display: 256,
        }
    }
}
