//! Connection Manager
//!
//! Accepts clients, dials the upstream for each one and hands the pair to
//! the relay engine. Accept and dial failures stop the whole listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::relay::RelayEngine;
use crate::Result;

/// Manages the listening socket and the sessions it spawns
pub struct ConnectionManager {
    listener: TcpListener,
    config: Arc<Config>,
    engine: Arc<RelayEngine>,
    accepted: AtomicUsize,
    shutdown_flag: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Bind the listen address from the configuration
    pub async fn bind(config: Arc<Config>, engine: Arc<RelayEngine>) -> Result<Self> {
        let listen_addr = config.proxy.listen_addr;

        info!("Binding TCP listener to {}", listen_addr);
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", listen_addr))?;

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            listener,
            config,
            engine,
            accepted: AtomicUsize::new(0),
            shutdown_flag: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Address actually bound, useful when listening on port 0
    pub fn get_bind_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn engine(&self) -> &Arc<RelayEngine> {
        &self.engine
    }

    /// Sessions currently being relayed
    pub fn get_active_connections(&self) -> usize {
        self.engine.active_session_count()
    }

    /// Connections accepted since start
    pub fn get_accepted_connections(&self) -> usize {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Accept connections until shutdown or a fatal error
    pub async fn run(&self) -> Result<()> {
        info!(
            "Proxy listening on {}, upstream {} (tls: {})",
            self.get_bind_addr()?,
            self.config.proxy.upstream_addr,
            self.config.proxy.tls
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Acquire) {
                info!("Shutdown flag set, stopping connection acceptance");
                return Ok(());
            }

            let (client, client_addr) = tokio::select! {
                accepted = self.listener.accept() => accepted.context("Failed to accept connection")?,
                _ = shutdown_rx.recv() => {
                    info!("Stopping connection acceptance");
                    return Ok(());
                }
            };

            info!("Incoming connection from {}, dialing upstream", client_addr);
            let upstream = TcpStream::connect(self.config.proxy.upstream_addr.as_str())
                .await
                .with_context(|| format!("Failed to dial upstream {}", self.config.proxy.upstream_addr))?;
            let upstream_addr = upstream.peer_addr().context("Failed to read upstream address")?;

            for stream in [&client, &upstream] {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }
            }

            self.accepted.fetch_add(1, Ordering::Relaxed);
            let session = self.engine.open_session(client_addr, upstream_addr);
            let span = info_span!(
                "session",
                session_id = %session.session_id,
                client = %client_addr,
                upstream = %upstream_addr
            );
            let engine = Arc::clone(&self.engine);

            tokio::spawn(
                async move {
                    engine.run_session(session, client, upstream).await;
                }
                .instrument(span),
            );
        }
    }

    /// Stop accepting and signal every live session
    pub fn initiate_shutdown(&self) {
        info!("Initiating connection manager shutdown");
        self.shutdown_flag.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());

        let cancelled = self.engine.cancel_all();
        if cancelled > 0 {
            info!("Signalled {} active sessions to close", cancelled);
        }
    }

    /// Wait for every session to finish, up to `timeout`
    pub async fn wait_for_connections_to_close(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let mut last_count = self.get_active_connections();

        while last_count > 0 && start.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(50)).await;

            let current_count = self.get_active_connections();
            if current_count != last_count {
                debug!("Active sessions: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        if last_count == 0 {
            info!("All sessions closed in {:?}", start.elapsed());
            Ok(())
        } else {
            anyhow::bail!("{} sessions still active after {:?}", last_count, timeout)
        }
    }
}
