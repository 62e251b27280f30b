//! Relay Engine
//!
//! Registry of live sessions. Every session is registered before its pumps
//! start and removed once both have stopped, so the proxy can cancel and
//! wait for all of them on shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};
use uuid::Uuid;

use super::session::{Session, SessionSummary};
use super::supervisor::{supervise, PumpSettings};
use crate::config::Config;
use crate::events::EventSink;
use crate::metrics::Metrics;
use crate::protocol::DecoderOptions;

/// Relays and decodes sessions, keeping track of the live ones
pub struct RelayEngine {
    settings: PumpSettings,
    metrics: Arc<Metrics>,
    active_sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl RelayEngine {
    /// Create a new relay engine
    pub fn new(
        options: DecoderOptions,
        buffer_size: usize,
        events: Arc<dyn EventSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            settings: PumpSettings {
                options,
                buffer_size,
                events,
            },
            metrics,
            active_sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new relay engine from configuration
    pub fn from_config(config: &Config, events: Arc<dyn EventSink>, metrics: Arc<Metrics>) -> Self {
        Self::new(config.decoder_options(), config.proxy.buffer_size, events, metrics)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.active_sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session for a freshly accepted pair
    pub fn open_session(&self, client_addr: SocketAddr, upstream_addr: SocketAddr) -> Arc<Session> {
        let session_id = Uuid::new_v4().simple().to_string();
        let session = Arc::new(Session::new(session_id.clone(), client_addr, upstream_addr));

        self.sessions().insert(session_id, Arc::clone(&session));
        self.metrics.session_opened();
        session
    }

    /// Relay both directions of a registered session until it ends
    pub async fn run_session<C, U>(&self, session: Arc<Session>, client: C, upstream: U) -> SessionSummary
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        U: AsyncRead + AsyncWrite + Send + 'static,
    {
        info!("Relaying {} -> {}", session.client_addr, session.upstream_addr);

        let (up, down) = supervise(Arc::clone(&session), client, upstream, self.settings.clone()).await;
        debug!(up = ?up.outcome, down = ?down.outcome, "Both directions stopped");

        self.remove_session(&session.session_id);
        session.log_stats();

        let summary = session.to_summary();
        self.metrics.session_closed(&summary);
        summary
    }

    /// Remove a session from active tracking
    pub fn remove_session(&self, session_id: &str) {
        if self.sessions().remove(session_id).is_some() {
            debug!("Removed session {} from active tracking", session_id);
        }
    }

    /// Signal every live session to stop. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let sessions = self.get_active_sessions();
        for session in &sessions {
            session.trigger_shutdown();
        }
        sessions.len()
    }

    pub fn get_active_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions().values().cloned().collect()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions().get(session_id).cloned()
    }
}
