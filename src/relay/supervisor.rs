//! Session Supervisor
//!
//! Runs the client->server and server->client pumps of one session in
//! parallel. Whichever pump stops first signals the other and shuts down
//! the write side it was forwarding into.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{debug, error, warn, Instrument};

use super::session::Session;
use super::tee::TeeReader;
use crate::events::EventSink;
use crate::protocol::{Decoder, DecoderOptions, Direction};

/// Why a pump stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The source reached end of stream
    EndOfStream,
    /// The counterpart stopped first
    Cancelled,
    /// Reading or forwarding failed
    Failed(String),
}

/// What one direction did before it stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionReport {
    pub direction: Direction,
    pub bytes_relayed: u64,
    pub messages: u64,
    pub decode_errors: u64,
    pub outcome: PumpOutcome,
}

/// Settings shared by both pumps of a session
#[derive(Clone)]
pub struct PumpSettings {
    pub options: DecoderOptions,
    pub buffer_size: usize,
    pub events: Arc<dyn EventSink>,
}

/// Relay and decode both directions until the session ends.
///
/// Returns the client->server report first.
pub async fn supervise<C, U>(
    session: Arc<Session>,
    client: C,
    upstream: U,
    settings: PumpSettings,
) -> (DirectionReport, DirectionReport)
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let up_rx = session.subscribe();
    let down_rx = session.subscribe();

    let up = tokio::spawn(
        pump(
            Direction::ClientToServer,
            client_read,
            upstream_write,
            settings.clone(),
            Arc::clone(&session),
            up_rx,
        )
        .in_current_span(),
    );
    let down = tokio::spawn(
        pump(
            Direction::ServerToClient,
            upstream_read,
            client_write,
            settings,
            Arc::clone(&session),
            down_rx,
        )
        .in_current_span(),
    );

    let (up, down) = tokio::join!(up, down);
    (
        joined(&session, Direction::ClientToServer, up),
        joined(&session, Direction::ServerToClient, down),
    )
}

async fn pump<R, W>(
    direction: Direction,
    source: R,
    sink: W,
    settings: PumpSettings,
    session: Arc<Session>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let tee = TeeReader::with_capacity(source, sink, settings.buffer_size);
    let mut decoder = Decoder::new(tee, direction, settings.options);

    let outcome = if session.is_shutting_down() {
        PumpOutcome::Cancelled
    } else {
        tokio::select! {
            result = decoder.run(&*settings.events) => match result {
                Ok(()) => {
                    debug!(%direction, "End of stream");
                    PumpOutcome::EndOfStream
                }
                Err(e) => {
                    warn!(%direction, error = %e, "Relay stopped");
                    PumpOutcome::Failed(e.to_string())
                }
            },
            _ = shutdown_rx.recv() => {
                debug!(%direction, "Counterpart stopped, closing this direction");
                PumpOutcome::Cancelled
            }
        }
    };

    if session.trigger_shutdown() {
        debug!(%direction, "Propagating shutdown to the other direction");
    }

    let stats = decoder.stats();
    let mut tee = decoder.into_inner();
    let forwarded = tee.forwarded();
    if let Err(e) = tee.sink_mut().shutdown().await {
        debug!(%direction, error = %e, "Failed to shut down forwarding side");
    }

    session.record(direction, forwarded, stats.messages, stats.decode_errors);

    DirectionReport {
        direction,
        bytes_relayed: forwarded,
        messages: stats.messages,
        decode_errors: stats.decode_errors,
        outcome,
    }
}

fn joined(
    session: &Session,
    direction: Direction,
    result: Result<DirectionReport, JoinError>,
) -> DirectionReport {
    result.unwrap_or_else(|e| {
        error!(%direction, error = %e, "Relay task aborted");
        session.trigger_shutdown();
        DirectionReport {
            direction,
            bytes_relayed: 0,
            messages: 0,
            decode_errors: 0,
            outcome: PumpOutcome::Failed(e.to_string()),
        }
    })
}
