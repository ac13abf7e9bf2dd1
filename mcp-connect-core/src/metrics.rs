//! Prometheus metrics using the prometheus-client crate.
//!
//! [`GatewayMetrics`] is created once at startup against a shared
//! [`Registry`] and handed to the session registry, the bridge cache and the
//! streaming handler. The gateway exports the registry at `GET /metrics` in
//! OpenMetrics text format.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Labels for per-backend session counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServerLabels {
    /// Configured server id (bounded by configuration).
    pub server_id: String,
}

/// Labels for SSE event counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    /// `message` or `error`.
    pub event: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// All gateway metrics. Cheap to clone; every field is an `Arc` internally.
#[derive(Clone, Debug)]
pub struct GatewayMetrics {
    pub sessions_active: Gauge,
    pub sessions_created: Family<ServerLabels, Counter>,
    pub sessions_reaped: Counter,
    pub bridge_cache_entries: Gauge,
    pub bridge_cache_hits: Counter,
    pub bridge_cache_misses: Counter,
    pub bridge_cache_evictions: Counter,
    pub sse_streams_opened: Counter,
    pub sse_events_emitted: Family<EventLabels, Counter>,
}

impl GatewayMetrics {
    /// Create the metrics and register them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let sessions_active = Gauge::default();
        registry.register(
            "mcp_connect_sessions_active",
            "Stream sessions currently registered",
            sessions_active.clone(),
        );

        let sessions_created = Family::<ServerLabels, Counter>::default();
        registry.register(
            "mcp_connect_sessions_created",
            "Stream sessions created per backend",
            sessions_created.clone(),
        );

        let sessions_reaped = Counter::default();
        registry.register(
            "mcp_connect_sessions_reaped",
            "Stream sessions closed by the idle reaper",
            sessions_reaped.clone(),
        );

        let bridge_cache_entries = Gauge::default();
        registry.register(
            "mcp_connect_bridge_cache_entries",
            "Bridge clients currently cached",
            bridge_cache_entries.clone(),
        );

        let bridge_cache_hits = Counter::default();
        registry.register(
            "mcp_connect_bridge_cache_hits",
            "Bridge requests served by a cached client",
            bridge_cache_hits.clone(),
        );

        let bridge_cache_misses = Counter::default();
        registry.register(
            "mcp_connect_bridge_cache_misses",
            "Bridge requests that created a new client",
            bridge_cache_misses.clone(),
        );

        let bridge_cache_evictions = Counter::default();
        registry.register(
            "mcp_connect_bridge_cache_evictions",
            "Bridge clients evicted by TTL or failed liveness probe",
            bridge_cache_evictions.clone(),
        );

        let sse_streams_opened = Counter::default();
        registry.register(
            "mcp_connect_sse_streams_opened",
            "Event streams opened by the streamable endpoint",
            sse_streams_opened.clone(),
        );

        let sse_events_emitted = Family::<EventLabels, Counter>::default();
        registry.register(
            "mcp_connect_sse_events_emitted",
            "Event frames written to SSE clients",
            sse_events_emitted.clone(),
        );

        Self {
            sessions_active,
            sessions_created,
            sessions_reaped,
            bridge_cache_entries,
            bridge_cache_hits,
            bridge_cache_misses,
            bridge_cache_evictions,
            sse_streams_opened,
            sse_events_emitted,
        }
    }

    /// Metrics backed by a throwaway registry, for tests and embedders that
    /// do not export them.
    pub fn unregistered() -> Self {
        Self::new(&mut Registry::default())
    }

    pub fn record_session_created(&self, server_id: &str) {
        self.sessions_created
            .get_or_create(&ServerLabels {
                server_id: server_id.to_string(),
            })
            .inc();
    }

    pub fn record_sse_event(&self, event: &str) {
        self.sse_events_emitted
            .get_or_create(&EventLabels {
                event: event.to_string(),
            })
            .inc();
    }
}
