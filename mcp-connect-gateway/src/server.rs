//! Gateway assembly: shared state, router, background sweeps and teardown.
//!
//! The session registry and the bridge cache are owned here. They are built
//! by [`Gateway::new`], swept by the tasks started in
//! [`Gateway::spawn_background_tasks`], and emptied by [`Gateway::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use mcp_connect_core::config::GatewayConfig;
use mcp_connect_core::config::defaults::MAX_BODY_BYTES;
use mcp_connect_core::metrics::GatewayMetrics;
use mcp_connect_core::session::{RegistryConfig, SessionRegistry};
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::bridge::{self, BridgeCache, BridgeConnector, StdioConnector};
use crate::health;
use crate::streamable;

/// State shared by every handler.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub sessions: Arc<SessionRegistry>,
    pub bridge: Arc<BridgeCache>,
    pub metrics: GatewayMetrics,
    pub prom_registry: Arc<Registry>,
}

/// The HTTP gateway and the components it owns.
pub struct Gateway {
    state: GatewayState,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Build the gateway with a custom bridge connector.
    pub fn new(config: GatewayConfig, connector: Arc<dyn BridgeConnector>) -> Self {
        let mut prom_registry = Registry::default();
        let metrics = GatewayMetrics::new(&mut prom_registry);

        let sessions = SessionRegistry::new(
            RegistryConfig {
                ttl: config.streamable.session_ttl,
                shutdown: config.shutdown,
            },
            metrics.clone(),
        );
        let bridge = BridgeCache::new(connector, config.bridge.cache_ttl, metrics.clone());

        Self {
            state: GatewayState {
                config: Arc::new(config),
                sessions,
                bridge,
                metrics,
                prom_registry: Arc::new(prom_registry),
            },
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build the gateway with bridge clients spawned as stdio subprocesses.
    pub fn with_stdio(config: GatewayConfig) -> Self {
        let connector = StdioConnector {
            request_timeout: config.bridge.request_timeout,
            shutdown: config.shutdown,
        };
        Self::new(config, Arc::new(connector))
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.state.config
    }

    /// Token cancelled by [`Gateway::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// All routes behind tracing, the body limit and the auth middleware.
    pub fn router(&self) -> Router {
        if self.state.config.security.auth_token.is_none() {
            tracing::warn!("no access token configured; every route is unauthenticated");
        }

        Router::new()
            .merge(streamable::routes())
            .merge(bridge::routes())
            .merge(health::routes())
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::require_auth,
            ))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
            )
            .with_state(self.state.clone())
    }

    /// Start the session reaper and the bridge cache sweeper, unless disabled.
    pub fn spawn_background_tasks(&self) {
        let mut tasks = self.tasks.lock();
        let config = &self.state.config;

        if config.streamable.cleanup_enabled {
            tasks.push(self.state.sessions.spawn_reaper(self.shutdown.child_token()));
            tracing::info!(
                ttl_ms = millis(config.streamable.session_ttl),
                "streamable session cleanup enabled"
            );
        } else {
            tracing::warn!("streamable session cleanup is disabled; idle sessions are never reaped");
        }

        if config.bridge.cleanup_enabled {
            tasks.push(self.state.bridge.spawn_sweeper(self.shutdown.child_token()));
            tracing::info!(
                ttl_ms = millis(config.bridge.cache_ttl),
                "bridge cache cleanup enabled"
            );
        } else {
            tracing::warn!("bridge cache cleanup is disabled; idle clients are never closed");
        }
    }

    /// Stop the sweeps, then close every bridge client and every session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }

        self.state.bridge.close_all().await;
        self.state.sessions.close_all().await;
        tracing::info!("gateway shut down");
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
