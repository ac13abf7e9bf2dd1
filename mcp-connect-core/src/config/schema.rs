//! Configuration schema types.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::{
    DEFAULT_BRIDGE_CACHE_TTL_MS, DEFAULT_HOST, DEFAULT_LOG_LEVEL, DEFAULT_PORT,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SESSION_TTL_MS,
};
use crate::transport::ShutdownRequest;

/// One stdio backend: how to launch it.
///
/// Loaded once at startup and shared by `Arc`; sessions never mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable to launch.
    pub command: String,

    /// Arguments passed to `command`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides layered over the inherited whitelist.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Per-request timeout hint in milliseconds. Carried, not applied.
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,

    /// Retry hint. Carried for backends that advertise it; the gateway does
    /// not retry requests itself.
    #[serde(default)]
    pub retries: Option<u32>,
}

impl ServerConfig {
    /// Convenience constructor used by tests and the bridge path.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: BTreeMap::new(),
            timeout_ms: None,
            retries: None,
        }
    }
}

/// Shape of the optional YAML configuration file.
///
/// ```yaml
/// servers:
///   filesystem:
///     command: npx
///     args: ["-y", "@modelcontextprotocol/server-filesystem", "/data"]
///     env:
///       API_KEY: ${FS_API_KEY}
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServersFile {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

/// Auth middleware settings.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// Bearer token; `None` disables token checks.
    pub auth_token: Option<String>,
    /// Allowed `Origin` values; empty allows all.
    pub allowed_origins: Vec<String>,
}

/// Streamable transport settings.
#[derive(Debug, Clone)]
pub struct StreamableConfig {
    /// Idle TTL after which a session is reaped.
    pub session_ttl: Duration,
    /// Configured backends by server id.
    pub servers: BTreeMap<String, Arc<ServerConfig>>,
    /// Whether the session reaper runs.
    pub cleanup_enabled: bool,
}

/// Bridge path settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Idle TTL after which a cached client is closed.
    pub cache_ttl: Duration,
    /// Timeout for a single bridge round trip.
    pub request_timeout: Duration,
    /// Whether the cache sweeper runs.
    pub cleanup_enabled: bool,
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen: ListenConfig,
    pub security: SecurityConfig,
    pub log_level: String,
    pub streamable: StreamableConfig,
    pub bridge: BridgeConfig,
    pub shutdown: ShutdownRequest,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
            },
            security: SecurityConfig::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            streamable: StreamableConfig {
                session_ttl: Duration::from_millis(DEFAULT_SESSION_TTL_MS),
                servers: BTreeMap::new(),
                cleanup_enabled: true,
            },
            bridge: BridgeConfig {
                cache_ttl: Duration::from_millis(DEFAULT_BRIDGE_CACHE_TTL_MS),
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                cleanup_enabled: true,
            },
            shutdown: ShutdownRequest::default(),
        }
    }
}

impl GatewayConfig {
    /// Look up a configured backend by id.
    pub fn server(&self, id: &str) -> Option<&Arc<ServerConfig>> {
        self.streamable.servers.get(id)
    }
}
