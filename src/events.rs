//! Decode Event Output
//!
//! Decoders hand every parsed message to an [`EventSink`]. The proxy logs
//! them through tracing; embedders and tests can collect them instead.

use std::fmt::Write as _;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::protocol::DecodeEvent;

/// Receives decode events from both directions of a session
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DecodeEvent);
}

impl EventSink for mpsc::UnboundedSender<DecodeEvent> {
    fn emit(&self, event: &DecodeEvent) {
        // A dropped receiver only means nobody is listening anymore
        let _ = self.send(event.clone());
    }
}

/// How payload bytes are rendered in log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Printable ASCII, everything else escaped
    #[default]
    Text,
    Hex,
    Base64,
}

impl PayloadFormat {
    /// Render at most `limit` bytes of `payload` (0 renders everything)
    pub fn render(&self, payload: &[u8], limit: usize) -> String {
        let shown = if limit == 0 { payload } else { &payload[..payload.len().min(limit)] };

        let mut out = match self {
            PayloadFormat::Text => shown.escape_ascii().to_string(),
            PayloadFormat::Hex => {
                let mut hex = String::with_capacity(shown.len() * 2);
                for byte in shown {
                    let _ = write!(hex, "{:02x}", byte);
                }
                hex
            }
            PayloadFormat::Base64 => base64::engine::general_purpose::STANDARD.encode(shown),
        };

        if shown.len() < payload.len() {
            let _ = write!(out, "...(+{} bytes)", payload.len() - shown.len());
        }
        out
    }
}

/// Layout of a logged decode event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFormat {
    /// Structured tracing fields
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logs decode events at INFO
#[derive(Debug, Clone)]
pub struct LogEventSink {
    payload_format: PayloadFormat,
    event_format: EventFormat,
    max_payload_display: usize,
}

impl LogEventSink {
    pub fn new(payload_format: PayloadFormat, event_format: EventFormat, max_payload_display: usize) -> Self {
        Self {
            payload_format,
            event_format,
            max_payload_display,
        }
    }

    /// Create a sink from the logging section of the configuration
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.logging.payload_format,
            config.logging.event_format,
            config.logging.max_payload_display,
        )
    }

    fn render_payload(&self, event: &DecodeEvent) -> String {
        // Startup payloads open with the code, which is logged on its own
        let payload = match event.startup_code() {
            Some(_) => &event.payload[4..],
            None => &event.payload[..],
        };
        self.payload_format.render(payload, self.max_payload_display)
    }

    /// JSON rendering of an event
    pub fn to_json(&self, event: &DecodeEvent) -> serde_json::Value {
        serde_json::json!({
            "direction": event.direction.as_str(),
            "tag": event.tag.map(|t| t.escape_ascii().to_string()),
            "name": event.name(),
            "code": event.startup_code(),
            "length": event.wire_length(),
            "payload": self.render_payload(event),
        })
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &DecodeEvent) {
        if self.event_format == EventFormat::Json {
            info!("{}", self.to_json(event));
            return;
        }

        match (event.tag, event.startup_code()) {
            (Some(tag), _) => info!(
                direction = %event.direction,
                tag = %tag.escape_ascii(),
                name = event.name(),
                length = event.wire_length(),
                payload = %self.render_payload(event),
                "{}", event.direction.arrow()
            ),
            (None, Some(code)) => info!(
                direction = %event.direction,
                version = code,
                name = event.name(),
                length = event.wire_length(),
                payload = %self.render_payload(event),
                "-->"
            ),
            (None, None) => info!(
                direction = %event.direction,
                length = event.wire_length(),
                "--> short startup message"
            ),
        }
    }
}
