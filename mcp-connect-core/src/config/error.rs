//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Source errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Explicit config file path does not exist.
    #[error("config file not found: {path}")]
    ConfigFileNotFound { path: PathBuf },

    /// Config file exists but is empty.
    #[error("config file is empty")]
    EmptyConfigFile,

    /// I/O error reading the config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// `MCP_SERVERS` is not a JSON object of server definitions.
    #[error("failed to parse MCP_SERVERS: {0}")]
    InvalidServersJson(#[source] serde_json::Error),

    // ─────────────────────────────────────────────────────────────────────────
    // Interpolation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Required environment variable not set.
    #[error("environment variable '{var}' not set (referenced in {field})")]
    MissingEnvVar { var: String, field: String },

    /// Server definitions nest deeper than interpolation will walk.
    #[error("configuration nested deeper than {max_depth} levels at {field}")]
    NestingTooDeep { field: String, max_depth: usize },

    // ─────────────────────────────────────────────────────────────────────────
    // Validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A server definition is structurally wrong.
    #[error("invalid server definition for '{id}': {reason}")]
    InvalidServer { id: String, reason: String },

    /// A server id that cannot appear in a URL path segment.
    #[error("invalid server id '{id}': must be non-empty and contain no '/'")]
    InvalidServerId { id: String },

    /// Generic invalid value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}
