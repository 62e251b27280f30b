//! PostgreSQL Wire Protocol Decoding
//!
//! Framing state machine that turns one direction of a proxied connection
//! into decode events. Nothing in here writes protocol bytes.

pub mod constants;
pub mod decoder;
pub mod error;
pub mod types;

pub use constants::*;
pub use decoder::Decoder;
pub use error::DecodeError;
pub use types::*;
