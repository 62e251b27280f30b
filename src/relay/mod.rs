//! Data Relay Module
//!
//! Byte-exact relay between client and upstream with a decoder riding on
//! each direction.

pub mod engine;
pub mod session;
pub mod supervisor;
pub mod tee;

pub use engine::RelayEngine;
pub use session::{Session, SessionSummary};
pub use supervisor::{supervise, DirectionReport, PumpOutcome, PumpSettings};
pub use tee::TeeReader;
