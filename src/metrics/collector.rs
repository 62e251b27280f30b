//! Metrics Collector

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tracing::error;

use crate::protocol::Direction;
use crate::relay::SessionSummary;
use crate::Result;

/// Prometheus metrics for relayed sessions
pub struct Metrics {
    registry: Registry,
    sessions_total: IntCounter,
    active_sessions: IntGauge,
    bytes_relayed_total: IntCounterVec,
    messages_decoded_total: IntCounterVec,
    decode_errors_total: IntCounter,
    session_duration: Histogram,
}

impl Metrics {
    /// Create and register all collectors
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let sessions_total = IntCounter::new("pgsniff_sessions_total", "Total number of proxied sessions")?;
        let active_sessions = IntGauge::new("pgsniff_active_sessions", "Number of sessions currently relayed")?;
        let bytes_relayed_total = IntCounterVec::new(
            Opts::new("pgsniff_bytes_relayed_total", "Bytes relayed, by direction"),
            &["direction"],
        )?;
        let messages_decoded_total = IntCounterVec::new(
            Opts::new("pgsniff_messages_decoded_total", "Protocol messages decoded, by direction"),
            &["direction"],
        )?;
        let decode_errors_total = IntCounter::new(
            "pgsniff_decode_errors_total",
            "Messages that could not be decoded",
        )?;
        let session_duration = Histogram::with_opts(
            HistogramOpts::new("pgsniff_session_duration_seconds", "Duration of proxied sessions in seconds")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 3600.0]),
        )?;

        registry.register(Box::new(sessions_total.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(bytes_relayed_total.clone()))?;
        registry.register(Box::new(messages_decoded_total.clone()))?;
        registry.register(Box::new(decode_errors_total.clone()))?;
        registry.register(Box::new(session_duration.clone()))?;

        Ok(Self {
            registry,
            sessions_total,
            active_sessions,
            bytes_relayed_total,
            messages_decoded_total,
            decode_errors_total,
            session_duration,
        })
    }

    pub fn session_opened(&self) {
        self.sessions_total.inc();
        self.active_sessions.inc();
    }

    pub fn session_closed(&self, summary: &SessionSummary) {
        self.active_sessions.dec();
        self.session_duration.observe(summary.duration.as_secs_f64());

        let up = Direction::ClientToServer.as_str();
        let down = Direction::ServerToClient.as_str();
        self.bytes_relayed_total.with_label_values(&[up]).inc_by(summary.bytes_up);
        self.bytes_relayed_total.with_label_values(&[down]).inc_by(summary.bytes_down);
        self.messages_decoded_total.with_label_values(&[up]).inc_by(summary.messages_up);
        self.messages_decoded_total.with_label_values(&[down]).inc_by(summary.messages_down);
        self.decode_errors_total.inc_by(summary.decode_errors);
    }

    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.get()
    }

    /// Prometheus text exposition of every collector
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        match encoder.encode_to_string(&self.registry.gather()) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}
