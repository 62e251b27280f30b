//! PostgreSQL Wire Protocol Types

use std::fmt;

use bytes::Bytes;

use crate::protocol::constants::*;

/// Which way bytes travel through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    /// Short label used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "client",
            Direction::ServerToClient => "server",
        }
    }

    /// Arrow shown next to typed messages
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "->>",
            Direction::ServerToClient => "<<-",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoder phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// First untyped message from the client (version or SSLRequest)
    AwaitingStartup,
    /// Real startup packet sent after a plaintext TLS refusal
    AwaitingStartupPacket,
    /// Single TLS response byte from the server
    AwaitingTlsAck,
    /// Tag + length + payload messages
    SteadyState,
    /// Framing lost or encrypted; bytes are relayed but not decoded
    Opaque,
    /// End of stream reached
    Closed,
}

impl Phase {
    /// Initial phase for a direction
    pub fn initial(direction: Direction, tls: bool) -> Self {
        match direction {
            Direction::ClientToServer => Phase::AwaitingStartup,
            Direction::ServerToClient if tls => Phase::SteadyState,
            Direction::ServerToClient => Phase::AwaitingTlsAck,
        }
    }
}

/// One successfully parsed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeEvent {
    pub direction: Direction,
    /// `None` for untyped startup-phase messages
    pub tag: Option<u8>,
    pub payload: Bytes,
}

impl DecodeEvent {
    /// Create an event for an untyped startup-phase message
    pub fn untyped(direction: Direction, payload: Bytes) -> Self {
        Self { direction, tag: None, payload }
    }

    /// Create an event for a typed message
    pub fn typed(direction: Direction, tag: u8, payload: Bytes) -> Self {
        Self { direction, tag: Some(tag), payload }
    }

    /// Version or request code of a startup message
    pub fn startup_code(&self) -> Option<u32> {
        if self.tag.is_some() {
            return None;
        }
        let code: [u8; STARTUP_CODE_SIZE] = self.payload.get(..STARTUP_CODE_SIZE)?.try_into().ok()?;
        Some(u32::from_be_bytes(code))
    }

    /// Human readable message name
    pub fn name(&self) -> &'static str {
        match self.tag {
            Some(tag) => message_name(self.direction, tag),
            None => self.startup_code().map(startup_code_name).unwrap_or("unknown"),
        }
    }

    /// Value the length field carried on the wire
    pub fn wire_length(&self) -> usize {
        self.payload.len() + LENGTH_FIELD_SIZE
    }
}

/// Decoder settings derived from the proxy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Must match whether the upstream negotiates TLS
    pub tls: bool,
    pub max_message_size: usize,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            tls: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Counters kept by a decoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub messages: u64,
    pub decode_errors: u64,
}
