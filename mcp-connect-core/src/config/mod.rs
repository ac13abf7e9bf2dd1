//! Gateway configuration: schema, defaults, loading and validation.
//!
//! Listener, auth and TTL settings come from CLI flags and environment
//! variables (parsed by the binary). Backend definitions come from the
//! `MCP_SERVERS` JSON variable and an optional YAML file; both pass through
//! `${VAR}` interpolation before being deserialized.

pub mod defaults;
mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{
    EnvLookup, interpolate_value, load_servers_file, merge_servers, parse_servers_json, validate,
};
pub use schema::{
    BridgeConfig, GatewayConfig, ListenConfig, SecurityConfig, ServerConfig, ServersFile,
    StreamableConfig,
};
