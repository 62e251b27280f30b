//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::protocol::Direction;

/// One accepted client connection and its upstream counterpart
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub upstream_addr: SocketAddr,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    messages_up: AtomicU64,
    messages_down: AtomicU64,
    decode_errors: AtomicU64,
    shutdown_flag: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

/// Figures for a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub upstream_addr: SocketAddr,
    pub duration: Duration,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub messages_up: u64,
    pub messages_down: u64,
    pub decode_errors: u64,
}

impl Session {
    /// Create a new session
    pub fn new(session_id: String, client_addr: SocketAddr, upstream_addr: SocketAddr) -> Self {
        debug!("Creating session {} ({} -> {})", session_id, client_addr, upstream_addr);

        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            session_id,
            client_addr,
            upstream_addr,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            messages_up: AtomicU64::new(0),
            messages_down: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            shutdown_flag: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Subscribe to the session shutdown signal.
    ///
    /// Subscribe before spawning the task that listens, otherwise a signal
    /// sent in between is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal both directions to stop. Returns `true` for the first caller.
    pub fn trigger_shutdown(&self) -> bool {
        let first = !self.shutdown_flag.swap(true, Ordering::AcqRel);
        if first {
            // No receivers left just means both directions already stopped
            let _ = self.shutdown_tx.send(());
        }
        first
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Acquire)
    }

    /// Add what one direction relayed and decoded
    pub fn record(&self, direction: Direction, bytes: u64, messages: u64, decode_errors: u64) {
        let (byte_counter, message_counter) = match direction {
            Direction::ClientToServer => (&self.bytes_up, &self.messages_up),
            Direction::ServerToClient => (&self.bytes_down, &self.messages_down),
        };
        byte_counter.fetch_add(bytes, Ordering::Relaxed);
        message_counter.fetch_add(messages, Ordering::Relaxed);
        self.decode_errors.fetch_add(decode_errors, Ordering::Relaxed);
    }

    /// Bytes relayed client to server
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes relayed server to client
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            client_addr: self.client_addr,
            upstream_addr: self.upstream_addr,
            duration: self.duration(),
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            messages_up: self.messages_up.load(Ordering::Relaxed),
            messages_down: self.messages_down.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }

    /// Log session statistics
    pub fn log_stats(&self) {
        let summary = self.to_summary();
        info!(
            session_id = %summary.session_id,
            client_addr = %summary.client_addr,
            upstream_addr = %summary.upstream_addr,
            duration_ms = summary.duration.as_millis() as u64,
            bytes_up = summary.bytes_up,
            bytes_down = summary.bytes_down,
            messages_up = summary.messages_up,
            messages_down = summary.messages_down,
            decode_errors = summary.decode_errors,
            "Session closed"
        );
    }
}
