//! Graceful Shutdown Handling
//!
//! Waits for SIGTERM/SIGINT, then stops the acceptor and drains live
//! sessions within the configured timeout.

use std::time::{Duration, Instant};

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx, timeout }
    }

    /// Receiver notified once a shutdown has been requested
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Request shutdown without waiting for a signal
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Shutdown requested but nothing is listening");
        }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then notify subscribers
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Stop accepting and give live sessions up to the timeout to close
    pub async fn shutdown_connection_manager(&self, connection_manager: &ConnectionManager) -> Result<()> {
        let start_time = Instant::now();
        connection_manager.initiate_shutdown();

        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            connection_manager.get_active_connections(),
            self.timeout
        );

        match connection_manager.wait_for_connections_to_close(self.timeout).await {
            Ok(()) => {
                info!("Shutdown complete in {:?}", start_time.elapsed());
                Ok(())
            }
            Err(e) => {
                warn!("Shutdown timeout reached: {}", e);
                Err(e)
            }
        }
    }
}
