//! Default values for gateway configuration.
//!
//! Every value here can be overridden by a CLI flag or environment variable
//! of the same meaning.

use std::time::Duration;

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default HTTP bind address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default idle TTL for streamable sessions (5 minutes).
pub const DEFAULT_SESSION_TTL_MS: u64 = 5 * 60 * 1000;

/// Default idle TTL for bridge cache entries (5 minutes).
pub const DEFAULT_BRIDGE_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

/// Default per-request timeout for bridge calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default log level when neither `RUST_LOG` nor `LOG_LEVEL` is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum depth walked by `${VAR}` interpolation.
pub const MAX_INTERPOLATION_DEPTH: usize = 32;

/// Maximum accepted HTTP request body.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Sweep interval for a given TTL: one third of it, never zero.
pub fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(1))
}
