//! Command-line and environment configuration for `mcp-connect`.
//!
//! Every flag has an environment variable of the same meaning; the flag wins
//! when both are set. Kept out of `main.rs` so tests can build a [`Cli`]
//! directly.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use mcp_connect_core::config::defaults::{
    DEFAULT_BRIDGE_CACHE_TTL_MS, DEFAULT_HOST, DEFAULT_LOG_LEVEL, DEFAULT_PORT,
    DEFAULT_SESSION_TTL_MS,
};
use mcp_connect_core::config::{
    BridgeConfig, ConfigError, EnvLookup, GatewayConfig, ListenConfig, SecurityConfig,
    ServerConfig, StreamableConfig, load_servers_file, merge_servers, parse_servers_json, validate,
};
use mcp_connect_core::transport::ShutdownRequest;

/// HTTP gateway for stdio MCP servers.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-connect", author, version, about, long_about = None)]
pub struct Cli {
    /// Bind address.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Listen port.
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Bearer token required on every route except /health.
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Legacy name for --auth-token.
    #[arg(long, env = "ACCESS_TOKEN", hide = true, hide_env_values = true)]
    pub access_token: Option<String>,

    /// Comma-separated Origin allow-list. Empty admits every origin.
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, env = "LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Idle TTL of streamable sessions, in milliseconds.
    #[arg(long, env = "STREAM_SESSION_TTL_MS", default_value_t = DEFAULT_SESSION_TTL_MS)]
    pub stream_session_ttl_ms: u64,

    /// Idle TTL of bridge cache entries, in milliseconds.
    #[arg(long, env = "BRIDGE_CACHE_TTL_MS", default_value_t = DEFAULT_BRIDGE_CACHE_TTL_MS)]
    pub bridge_cache_ttl_ms: u64,

    /// Per-request timeout of bridge calls, in milliseconds.
    #[arg(long, env = "BRIDGE_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub bridge_request_timeout_ms: u64,

    /// Never sweep the bridge cache.
    #[arg(long, env = "DISABLE_BRIDGE_CLEANUP", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub disable_bridge_cleanup: bool,

    /// Never reap idle streamable sessions.
    #[arg(long, env = "DISABLE_STREAM_CLEANUP", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub disable_stream_cleanup: bool,

    /// Backend definitions as a JSON map of id to {command, args, env}.
    #[arg(long, env = "MCP_SERVERS", hide_env_values = true)]
    pub mcp_servers: Option<String>,

    /// YAML file with a `servers` map, merged over MCP_SERVERS.
    #[arg(long, env = "MCP_CONNECT_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Resolve, interpolate and validate the full gateway configuration.
    ///
    /// # Errors
    ///
    /// Any malformed server definition, missing interpolation variable or
    /// out-of-range value.
    pub fn into_config(self, lookup: EnvLookup<'_>) -> Result<GatewayConfig, ConfigError> {
        let mut servers = match self.mcp_servers.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_servers_json(raw, lookup)?,
            _ => BTreeMap::new(),
        };
        if let Some(path) = &self.config {
            servers = merge_servers(servers, load_servers_file(path, lookup)?);
        }
        let servers: BTreeMap<String, Arc<ServerConfig>> = servers
            .into_iter()
            .map(|(id, server)| (id, Arc::new(server)))
            .collect();

        let allowed_origins = self
            .allowed_origins
            .into_iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        let config = GatewayConfig {
            listen: ListenConfig {
                host: self.host,
                port: self.port,
            },
            security: SecurityConfig {
                auth_token: self
                    .auth_token
                    .or(self.access_token)
                    .filter(|t| !t.is_empty()),
                allowed_origins,
            },
            log_level: self.log_level,
            streamable: StreamableConfig {
                session_ttl: Duration::from_millis(self.stream_session_ttl_ms),
                servers,
                cleanup_enabled: !self.disable_stream_cleanup,
            },
            bridge: BridgeConfig {
                cache_ttl: Duration::from_millis(self.bridge_cache_ttl_ms),
                request_timeout: Duration::from_millis(self.bridge_request_timeout_ms),
                cleanup_enabled: !self.disable_bridge_cleanup,
            },
            shutdown: ShutdownRequest::default(),
        };
        validate(&config)?;
        Ok(config)
    }
}
