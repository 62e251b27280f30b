//! Protocol Decoder
//!
//! Per-direction framing state machine. The decoder only ever reads; every
//! byte it pulls has already been forwarded by the tee underneath it.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::events::EventSink;
use crate::protocol::constants::*;
use crate::protocol::error::DecodeError;
use crate::protocol::types::{DecodeEvent, DecoderOptions, DecoderStats, Direction, Phase};

/// Decodes one direction of a proxied connection
pub struct Decoder<R> {
    reader: R,
    direction: Direction,
    phase: Phase,
    options: DecoderOptions,
    msg: BytesMut,
    stats: DecoderStats,
    /// Server side with TLS: the first byte answers the client's SSLRequest
    tls_answer_pending: bool,
}

impl<R: AsyncRead + Unpin> Decoder<R> {
    /// Create a decoder positioned at the start of a connection
    pub fn new(reader: R, direction: Direction, options: DecoderOptions) -> Self {
        Self {
            reader,
            direction,
            phase: Phase::initial(direction, options.tls),
            options,
            msg: BytesMut::new(),
            stats: DecoderStats::default(),
            tls_answer_pending: options.tls && direction == Direction::ServerToClient,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Decode until end of stream, handing every event to `events`.
    ///
    /// Per-message failures are logged and skipped. Only I/O failures end
    /// the loop with an error; end of stream ends it with `Ok`.
    pub async fn run<S: EventSink + ?Sized>(&mut self, events: &S) -> Result<(), DecodeError> {
        loop {
            match self.next_event().await {
                Ok(Some(event)) => {
                    self.stats.messages += 1;
                    events.emit(&event);
                }
                Ok(None) => return Ok(()),
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    self.stats.decode_errors += 1;
                    warn!(direction = %self.direction, error = %e, "Failed to decode message");
                }
            }
        }
    }

    /// Advance the state machine to the next event.
    ///
    /// Returns `Ok(None)` once the stream has ended.
    pub async fn next_event(&mut self) -> Result<Option<DecodeEvent>, DecodeError> {
        loop {
            match self.phase {
                Phase::AwaitingStartup | Phase::AwaitingStartupPacket => {
                    let event = match self.read_untyped().await {
                        Ok(Some(event)) => event,
                        Ok(None) => return Ok(None),
                        Err(e) => {
                            if !e.is_terminal() {
                                self.enter_opaque("startup framing lost");
                            }
                            return Err(e);
                        }
                    };

                    // Without TLS the client follows its SSLRequest with the
                    // real startup packet once the server has said 'N'.
                    self.phase = if self.phase == Phase::AwaitingStartup && !self.options.tls {
                        Phase::AwaitingStartupPacket
                    } else {
                        Phase::SteadyState
                    };
                    return Ok(Some(event));
                }
                Phase::AwaitingTlsAck => {
                    let mut ack = [0u8; 1];
                    if self.reader.read(&mut ack).await? == 0 {
                        self.phase = Phase::Closed;
                        return Ok(None);
                    }
                    debug!(
                        direction = %self.direction,
                        response = %ack[0].escape_ascii(),
                        rejected = ack[0] == TLS_REJECTED,
                        "Skipped TLS negotiation response"
                    );
                    self.phase = Phase::SteadyState;
                }
                Phase::SteadyState => {
                    if let Some(event) = self.read_typed().await? {
                        return Ok(Some(event));
                    }
                }
                Phase::Opaque => {
                    let drained = tokio::io::copy(&mut self.reader, &mut tokio::io::sink()).await?;
                    debug!(direction = %self.direction, bytes = drained, "Opaque stream ended");
                    self.phase = Phase::Closed;
                }
                Phase::Closed => return Ok(None),
            }
        }
    }

    /// Read `length + payload`, where the payload starts with a 32-bit code
    async fn read_untyped(&mut self) -> Result<Option<DecodeEvent>, DecodeError> {
        let Some(length) = self.read_length().await? else {
            return Ok(None);
        };

        if length < MIN_STARTUP_LENGTH {
            return Err(DecodeError::InvalidLength {
                frame: "startup message",
                length,
                minimum: MIN_STARTUP_LENGTH,
            });
        }
        if length > MAX_STARTUP_PACKET_LENGTH {
            return Err(DecodeError::FrameTooLarge {
                frame: "startup message",
                length,
                limit: MAX_STARTUP_PACKET_LENGTH as usize,
            });
        }

        let Some(payload) = self.read_payload(length as usize - LENGTH_FIELD_SIZE).await? else {
            return Ok(None);
        };
        Ok(Some(DecodeEvent::untyped(self.direction, payload)))
    }

    /// Read `tag + length + payload`
    async fn read_typed(&mut self) -> Result<Option<DecodeEvent>, DecodeError> {
        let mut tag = [0u8; 1];
        if self.reader.read(&mut tag).await? == 0 {
            self.phase = Phase::Closed;
            return Ok(None);
        }
        let tag = tag[0];

        if std::mem::take(&mut self.tls_answer_pending) {
            match tag {
                TLS_ACCEPTED => {
                    info!(direction = %self.direction, "Server accepted TLS, remaining traffic is relayed without decoding");
                    self.phase = Phase::Opaque;
                    return Ok(None);
                }
                TLS_REJECTED => {
                    debug!(direction = %self.direction, "Server rejected TLS, decoding continues in plaintext");
                    return Ok(None);
                }
                _ => {}
            }
        }

        if self.options.tls && tag == TLS_HANDSHAKE_RECORD {
            info!(direction = %self.direction, "TLS handshake detected, remaining traffic is relayed without decoding");
            self.phase = Phase::Opaque;
            return Ok(None);
        }

        let Some(length) = self.read_length().await? else {
            return Ok(None);
        };

        if length < MIN_TYPED_LENGTH {
            return Err(DecodeError::InvalidLength {
                frame: "message",
                length,
                minimum: MIN_TYPED_LENGTH,
            });
        }
        if length as usize > self.options.max_message_size {
            self.enter_opaque("message length out of range");
            return Err(DecodeError::FrameTooLarge {
                frame: "message",
                length,
                limit: self.options.max_message_size,
            });
        }

        let Some(payload) = self.read_payload(length as usize - LENGTH_FIELD_SIZE).await? else {
            return Ok(None);
        };
        Ok(Some(DecodeEvent::typed(self.direction, tag, payload)))
    }

    async fn read_length(&mut self) -> Result<Option<u32>, DecodeError> {
        let mut length = [0u8; LENGTH_FIELD_SIZE];
        let result = self.reader.read_exact(&mut length).await;
        let complete = self.check_truncation(result)?;
        Ok(complete.then(|| u32::from_be_bytes(length)))
    }

    /// Read exactly `len` payload bytes into the reusable message buffer.
    ///
    /// The buffer only grows as bytes actually arrive, so a length field
    /// alone never sizes an allocation.
    async fn read_payload(&mut self, len: usize) -> Result<Option<Bytes>, DecodeError> {
        self.msg.clear();
        while self.msg.len() < len {
            let remaining = len - self.msg.len();
            self.msg.reserve(remaining.min(PAYLOAD_READ_CHUNK));
            let read = (&mut self.reader)
                .take(remaining as u64)
                .read_buf(&mut self.msg)
                .await?;
            if read == 0 {
                self.truncated();
                return Ok(None);
            }
        }
        Ok(Some(self.msg.split_to(len).freeze()))
    }

    fn check_truncation(&mut self, result: io::Result<usize>) -> Result<bool, DecodeError> {
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.truncated();
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A short read inside a frame ends the stream without an event
    fn truncated(&mut self) {
        debug!(direction = %self.direction, "Stream ended in the middle of a message");
        self.msg.clear();
        self.phase = Phase::Closed;
    }

    fn enter_opaque(&mut self, reason: &str) {
        info!(direction = %self.direction, reason, "Framing lost, remaining traffic is relayed without decoding");
        self.phase = Phase::Opaque;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    fn typed(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![tag];
        frame.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[tokio::test]
    async fn test_initial_phases() {
        let empty: &[u8] = &[];
        let plain = DecoderOptions::default();
        let tls = DecoderOptions { tls: true, ..plain };

        assert_eq!(Decoder::new(empty, Direction::ClientToServer, plain).phase(), Phase::AwaitingStartup);
        assert_eq!(Decoder::new(empty, Direction::ClientToServer, tls).phase(), Phase::AwaitingStartup);
        assert_eq!(Decoder::new(empty, Direction::ServerToClient, plain).phase(), Phase::AwaitingTlsAck);
        assert_eq!(Decoder::new(empty, Direction::ServerToClient, tls).phase(), Phase::SteadyState);
    }

    #[tokio::test]
    async fn test_invalid_length_skips_only_that_frame() {
        let mut bytes = vec![b'Z', 0, 0, 0, 2];
        bytes.extend(typed(b'Z', b"I"));
        let options = DecoderOptions { tls: true, ..Default::default() };
        let mut decoder = Decoder::new(&bytes[..], Direction::ServerToClient, options);

        let err = decoder.next_event().await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidLength { length: 2, .. }));
        assert_eq!(decoder.phase(), Phase::SteadyState);

        let event = decoder.next_event().await.unwrap().unwrap();
        assert_eq!(event.tag, Some(b'Z'));
        assert_eq!(&event.payload[..], b"I");
    }

    #[tokio::test]
    async fn test_oversized_frame_turns_stream_opaque() {
        let mut bytes = vec![b'D', 0x7f, 0, 0, 0];
        bytes.extend(typed(b'Z', b"I"));
        let options = DecoderOptions { tls: true, max_message_size: 1024 };
        let mut decoder = Decoder::new(&bytes[..], Direction::ServerToClient, options);

        let err = decoder.next_event().await.unwrap_err();
        assert!(matches!(err, DecodeError::FrameTooLarge { .. }));
        assert_eq!(decoder.phase(), Phase::Opaque);

        // Remaining bytes are drained, not decoded
        assert!(decoder.next_event().await.unwrap().is_none());
        assert_eq!(decoder.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn test_length_header_alone_does_not_size_the_buffer() {
        let (mut peer, stream) = tokio::io::duplex(1024);
        let options = DecoderOptions { tls: true, ..Default::default() };
        let mut decoder = Decoder::new(stream, Direction::ServerToClient, options);

        peer.write_all(&[b'Q', 0x03, 0xff, 0xff, 0xff]).await.unwrap();
        let pending = timeout(Duration::from_millis(100), decoder.next_event()).await;
        assert!(pending.is_err());
        assert!(decoder.msg.capacity() < 1024 * 1024, "capacity {}", decoder.msg.capacity());
    }

    #[tokio::test]
    async fn test_large_payload_is_read_in_chunks_and_buffer_reused() {
        let first: Vec<u8> = (0..3 * PAYLOAD_READ_CHUNK + 17).map(|i| i as u8).collect();
        let mut bytes = typed(b'D', &first);
        bytes.extend(typed(b'Z', b"I"));
        let options = DecoderOptions { tls: true, ..Default::default() };
        let mut decoder = Decoder::new(&bytes[..], Direction::ServerToClient, options);

        let event = decoder.next_event().await.unwrap().unwrap();
        assert_eq!(event.payload.len(), first.len());
        assert_eq!(&event.payload[..], &first[..]);
        drop(event);

        let event = decoder.next_event().await.unwrap().unwrap();
        assert_eq!(&event.payload[..], b"I");
        assert!(decoder.msg.is_empty());
    }
}
