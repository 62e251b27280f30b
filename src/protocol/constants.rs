//! PostgreSQL Wire Protocol Constants

use super::types::Direction;

// Startup codes carried in the first four payload bytes of an untyped message
pub const PROTOCOL_VERSION_3_0: u32 = 196_608;
pub const CANCEL_REQUEST_CODE: u32 = 80_877_102;
pub const SSL_REQUEST_CODE: u32 = 80_877_103;
pub const GSSENC_REQUEST_CODE: u32 = 80_877_104;

// Single byte answer to an SSLRequest
pub const TLS_ACCEPTED: u8 = b'S';
pub const TLS_REJECTED: u8 = b'N';

// TLS record content type for handshake messages
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

// Frame layout
pub const LENGTH_FIELD_SIZE: usize = 4;
pub const STARTUP_CODE_SIZE: usize = 4;
pub const MIN_STARTUP_LENGTH: u32 = (LENGTH_FIELD_SIZE + STARTUP_CODE_SIZE) as u32;
pub const MIN_TYPED_LENGTH: u32 = LENGTH_FIELD_SIZE as u32;

/// Servers refuse startup packets larger than this.
pub const MAX_STARTUP_PACKET_LENGTH: u32 = 10_000;

/// Payload bytes requested from the source per read.
pub const PAYLOAD_READ_CHUNK: usize = 8 * 1024;

/// Default upper bound for a typed frame before framing is considered lost.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Human readable name of a startup code.
pub fn startup_code_name(code: u32) -> &'static str {
    match code {
        PROTOCOL_VERSION_3_0 => "protocol 3.0",
        SSL_REQUEST_CODE => "SSLRequest",
        CANCEL_REQUEST_CODE => "CancelRequest",
        GSSENC_REQUEST_CODE => "GSSENCRequest",
        _ => "unknown",
    }
}

/// Name of a typed message. Tags are reused between directions, so the
/// direction decides which table applies.
pub fn message_name(direction: Direction, tag: u8) -> &'static str {
    match direction {
        Direction::ClientToServer => frontend_message_name(tag),
        Direction::ServerToClient => backend_message_name(tag),
    }
}

fn frontend_message_name(tag: u8) -> &'static str {
    match tag {
        b'B' => "Bind",
        b'C' => "Close",
        b'd' => "CopyData",
        b'c' => "CopyDone",
        b'f' => "CopyFail",
        b'D' => "Describe",
        b'E' => "Execute",
        b'H' => "Flush",
        b'F' => "FunctionCall",
        b'P' => "Parse",
        b'p' => "PasswordMessage",
        b'Q' => "Query",
        b'S' => "Sync",
        b'X' => "Terminate",
        _ => "Unknown",
    }
}

fn backend_message_name(tag: u8) -> &'static str {
    match tag {
        b'R' => "Authentication",
        b'K' => "BackendKeyData",
        b'2' => "BindComplete",
        b'3' => "CloseComplete",
        b'C' => "CommandComplete",
        b'd' => "CopyData",
        b'c' => "CopyDone",
        b'G' => "CopyInResponse",
        b'H' => "CopyOutResponse",
        b'W' => "CopyBothResponse",
        b'D' => "DataRow",
        b'I' => "EmptyQueryResponse",
        b'E' => "ErrorResponse",
        b'V' => "FunctionCallResponse",
        b'v' => "NegotiateProtocolVersion",
        b'n' => "NoData",
        b'N' => "NoticeResponse",
        b'A' => "NotificationResponse",
        b't' => "ParameterDescription",
        b'S' => "ParameterStatus",
        b'1' => "ParseComplete",
        b's' => "PortalSuspended",
        b'Z' => "ReadyForQuery",
        b'T' => "RowDescription",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names_depend_on_direction() {
        assert_eq!(message_name(Direction::ClientToServer, b'S'), "Sync");
        assert_eq!(message_name(Direction::ServerToClient, b'S'), "ParameterStatus");
        assert_eq!(message_name(Direction::ClientToServer, b'Q'), "Query");
        assert_eq!(message_name(Direction::ServerToClient, b'Q'), "Unknown");
    }

    #[test]
    fn test_startup_code_names() {
        assert_eq!(startup_code_name(196608), "protocol 3.0");
        assert_eq!(startup_code_name(80877103), "SSLRequest");
        assert_eq!(startup_code_name(42), "unknown");
    }
}
