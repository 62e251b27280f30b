//! pgsniff Library
//!
//! Transparent PostgreSQL wire protocol sniffer. Every byte is relayed
//! verbatim between client and server while a decoder on each direction
//! turns the stream into human readable events.

pub mod config;
pub mod connection;
pub mod events;
pub mod metrics;
pub mod protocol;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use connection::ConnectionManager;
pub use relay::RelayEngine;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the proxy
pub type Result<T> = anyhow::Result<T>;
