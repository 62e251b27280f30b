//! Decode Errors

use std::io;

use thiserror::Error;

/// Failures while decoding one direction of the stream
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Reading from the source or forwarding to the sink failed
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// A length field smaller than the frame it must describe
    #[error("invalid {frame} length {length} (minimum {minimum})")]
    InvalidLength {
        frame: &'static str,
        length: u32,
        minimum: u32,
    },

    /// A length field above the configured limit
    #[error("{frame} length {length} exceeds limit of {limit} bytes")]
    FrameTooLarge {
        frame: &'static str,
        length: u32,
        limit: usize,
    },
}

impl DecodeError {
    /// Terminal errors end the decode loop; the rest only spoil one message
    pub fn is_terminal(&self) -> bool {
        matches!(self, DecodeError::Io(_))
    }
}
