//! Registry of live stream sessions with idle reaping.
//!
//! Sessions are registered only after their backend started successfully, so
//! a lookup can never observe a session whose start failed. Removal always
//! happens before close, so a concurrent lookup sees either a live session or
//! nothing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::config::defaults::sweep_interval;
use crate::error::TransportError;
use crate::metrics::GatewayMetrics;
use crate::transport::{SessionEvent, ShutdownRequest, StreamSession, Subscription};

/// Session registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Idle time after which a session is reaped.
    pub ttl: Duration,
    /// Grace periods used when closing a session's backend.
    pub shutdown: ShutdownRequest,
}

/// Maps session ids to live [`StreamSession`]s.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<StreamSession>>,
    config: RegistryConfig,
    metrics: GatewayMetrics,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, metrics: GatewayMetrics) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            config,
            metrics,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start a new session for `server_id` and register it.
    ///
    /// The id is a random UUID v4.
    ///
    /// # Errors
    ///
    /// Propagates the start failure; nothing is registered in that case.
    pub async fn create_session(
        self: &Arc<Self>,
        server_id: &str,
        server: Arc<ServerConfig>,
    ) -> Result<Arc<StreamSession>, TransportError> {
        let id = Uuid::new_v4().to_string();
        let session = StreamSession::new(id.clone(), server_id, server, self.config.shutdown);
        session.ensure_started().await?;

        // Subscribe before registering so a close racing the insert is seen.
        let events = session.subscribe();
        self.sessions.insert(id.clone(), Arc::clone(&session));
        self.metrics.sessions_active.inc();
        self.metrics.record_session_created(server_id);
        self.watch(Arc::clone(&session), events);

        tracing::info!(session_id = %id, server_id, "stream session registered");
        Ok(session)
    }

    /// Deregister `session` once it closes, however it was closed.
    fn watch(self: &Arc<Self>, session: Arc<StreamSession>, mut events: Subscription) {
        let registry = Arc::downgrade(self);
        let session = Arc::downgrade(&session);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Some(SessionEvent::Closed) | None => break,
                    Some(_) => {}
                }
            }
            drop(events);
            if let (Some(registry), Some(session)) = (registry.upgrade(), session.upgrade()) {
                if registry.remove_entry(&session) {
                    tracing::debug!(session_id = %session.id(), "deregistered closed session");
                }
            }
        });
    }

    /// Remove exactly this session object (not a newer one with the same id).
    fn remove_entry(&self, session: &Arc<StreamSession>) -> bool {
        let removed = self
            .sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            self.metrics.sessions_active.dec();
        }
        removed
    }

    /// Look up a live session belonging to `expected_server_id`.
    ///
    /// A session registered for another server is reported as not found.
    pub fn get_session(&self, id: &str, expected_server_id: &str) -> Option<Arc<StreamSession>> {
        let session = self.sessions.get(id)?;
        if session.server_id() != expected_server_id || session.is_closed() {
            return None;
        }
        Some(Arc::clone(session.value()))
    }

    /// Remove and close the session. Idempotent.
    pub async fn close_session(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        self.metrics.sessions_active.dec();
        session.close().await;
        true
    }

    /// Remove and close the session only if it belongs to `server_id`.
    pub async fn close_session_for(&self, id: &str, server_id: &str) -> bool {
        let Some((_, session)) = self
            .sessions
            .remove_if(id, |_, session| session.server_id() == server_id)
        else {
            return false;
        };
        self.metrics.sessions_active.dec();
        session.close().await;
        true
    }

    /// Reap sessions idle for longer than the TTL.
    pub fn reap_expired_sessions(&self) -> usize {
        self.reap_expired_at(Instant::now())
    }

    /// Reap sessions idle for longer than the TTL as of `now`.
    ///
    /// Expiry is re-checked atomically with removal, so a session used after
    /// the scan started survives. Closing runs in the background.
    pub fn reap_expired_at(&self, now: Instant) -> usize {
        let ttl = self.config.ttl;
        let expired = |session: &Arc<StreamSession>| {
            now.saturating_duration_since(session.last_used()) > ttl
        };

        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for id in candidates {
            if let Some((_, session)) = self.sessions.remove_if(&id, |_, s| expired(s)) {
                reaped += 1;
                self.metrics.sessions_active.dec();
                self.metrics.sessions_reaped.inc();
                tracing::info!(
                    session_id = %id,
                    server_id = %session.server_id(),
                    "reaping idle stream session"
                );
                tokio::spawn(async move { session.close().await });
            }
        }
        reaped
    }

    /// Run `reap_expired_sessions` every TTL/3 until `shutdown` is cancelled.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let period = sweep_interval(self.config.ttl);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("session reaper stopping due to shutdown");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        let reaped = registry.reap_expired_sessions();
                        if reaped > 0 {
                            tracing::debug!(reaped, remaining = registry.len(), "session sweep complete");
                        }
                    }
                }
            }
        })
    }

    /// Close every registered session concurrently.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut closing = tokio::task::JoinSet::new();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                self.metrics.sessions_active.dec();
                closing.spawn(async move { session.close().await });
            }
        }
        while closing.join_next().await.is_some() {}
    }
}
