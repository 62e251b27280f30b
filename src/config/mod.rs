//! Configuration Module
//!
//! Handles configuration loading and validation. The result is immutable
//! once the proxy starts.

pub mod manager;
pub mod types;

pub use manager::{CliOverrides, ConfigManager};
pub use types::*;
