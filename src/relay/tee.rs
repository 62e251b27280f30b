//! Tee Reader
//!
//! Bytes pulled from the source are written to the sink before the reader
//! sees them, so whatever the decoder does with its copy, the peer gets the
//! exact stream.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Default size of a single read from the source
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Forwards everything read from `source` to `sink` and exposes the same
/// bytes through its own [`AsyncRead`] implementation
#[derive(Debug)]
pub struct TeeReader<R, W> {
    source: R,
    sink: W,
    /// Bytes read from the source; the first `sent` of them reached the sink
    buf: BytesMut,
    sent: usize,
    needs_flush: bool,
    scratch: Vec<u8>,
    forwarded: u64,
}

impl<R, W> TeeReader<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(source: R, sink: W) -> Self {
        Self::with_capacity(source, sink, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_capacity(source: R, sink: W, chunk_size: usize) -> Self {
        Self {
            source,
            sink,
            buf: BytesMut::with_capacity(chunk_size),
            sent: 0,
            needs_flush: false,
            scratch: vec![0; chunk_size.max(1)],
            forwarded: 0,
        }
    }

    /// Total bytes written to the sink so far
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_parts(self) -> (R, W) {
        (self.source, self.sink)
    }

    /// Push any read-but-unsent bytes to the sink
    fn poll_forward(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.sent < self.buf.len() {
            let n = ready!(Pin::new(&mut self.sink).poll_write(cx, &self.buf[self.sent..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink stopped accepting relayed bytes",
                )));
            }
            self.sent += n;
            self.forwarded += n as u64;
            self.needs_flush = true;
        }

        if self.needs_flush {
            ready!(Pin::new(&mut self.sink).poll_flush(cx))?;
            self.needs_flush = false;
        }
        Poll::Ready(Ok(()))
    }
}

impl<R, W> AsyncRead for TeeReader<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            ready!(this.poll_forward(cx))?;

            if !this.buf.is_empty() {
                let n = out.remaining().min(this.buf.len());
                out.put_slice(&this.buf[..n]);
                this.buf.advance(n);
                this.sent -= n;
                return Poll::Ready(Ok(()));
            }

            if out.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            let mut chunk = ReadBuf::new(&mut this.scratch);
            ready!(Pin::new(&mut this.source).poll_read(cx, &mut chunk))?;
            if chunk.filled().is_empty() {
                // End of stream
                return Poll::Ready(Ok(()));
            }
            this.buf.extend_from_slice(chunk.filled());
            this.sent = 0;
        }
    }
}
