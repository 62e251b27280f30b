//! Metrics Module
//!
//! Prometheus counters for relayed sessions and the scrape endpoint.

pub mod collector;
pub mod server;

pub use collector::Metrics;
pub use server::MetricsServer;
