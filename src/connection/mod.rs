//! Connection Acceptance Module

pub mod manager;

pub use manager::ConnectionManager;
