//! Error taxonomy shared by the transport, the session registry and the
//! HTTP gateway.
//!
//! Every variant has two renderings: `Display`, which carries full detail and
//! goes to logs only, and [`GatewayError::public_message`], which is what an
//! HTTP client is allowed to see.

use std::process::ExitStatus;

use crate::config::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Transport Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Process-level failures of one stdio backend.
///
/// Any of these, except `SessionClosed` and `Timeout`, also closes the
/// session that raised it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The backend command could not be spawned.
    #[error("Failed to spawn '{command}': {reason}")]
    Spawn {
        /// The configured launch command.
        command: String,
        /// OS-level failure description.
        reason: String,
    },

    /// A stdio pipe was not available after spawn.
    #[error("Backend {stream} pipe unavailable")]
    MissingPipe {
        /// Which stream: `stdin`, `stdout` or `stderr`.
        stream: &'static str,
    },

    /// Reading from or writing to the backend failed.
    #[error("Backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend closed its stdin while a write was in progress.
    #[error("Broken pipe writing to backend")]
    BrokenPipe,

    /// The backend closed stdout without being asked to stop.
    #[error("Backend exited unexpectedly ({status})")]
    UnexpectedExit {
        /// Exit status description, or `unknown` if not yet reaped.
        status: String,
    },

    /// The session is closed; sends fail permanently.
    #[error("Session is closed")]
    SessionClosed,

    /// A request did not receive a response in time.
    #[error("Timed out after {millis}ms waiting for backend")]
    Timeout {
        /// The timeout that elapsed.
        millis: u64,
    },

    /// An outbound message could not be serialized.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl TransportError {
    /// Builds `UnexpectedExit` from an optional exit status.
    pub fn unexpected_exit(status: Option<ExitStatus>) -> Self {
        TransportError::UnexpectedExit {
            status: status.map_or_else(|| "unknown".to_string(), |s| s.to_string()),
        }
    }

    /// Opaque description safe to send to HTTP clients.
    pub fn public_message(&self) -> &'static str {
        match self {
            TransportError::SessionClosed => "Session is closed",
            TransportError::Timeout { .. } => "Timed out waiting for MCP server",
            _ => "MCP server transport failure",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level gateway error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed or missing backend definition. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Spawn failure, broken pipe, unexpected exit.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Unknown session id, or an id registered for a different server.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The id the client supplied.
        session_id: String,
    },

    /// Malformed request body or headers.
    #[error("Validation error: {details}")]
    Validation {
        /// Client-facing description of what was wrong.
        details: String,
    },

    /// The accept declaration does not cover both JSON and event-stream.
    #[error("Accept header must include application/json and text/event-stream")]
    NotAcceptable,

    /// Missing or wrong credentials, or a disallowed origin.
    #[error("Authentication failed ({status}): {reason}")]
    Auth {
        /// 401 or 403.
        status: u16,
        /// Client-facing reason.
        reason: String,
    },

    /// The backend answered with a JSON-RPC error object.
    #[error("Backend returned error {code}: {message}")]
    Backend {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

impl GatewayError {
    /// Message rendered in the `{"error": ...}` body.
    ///
    /// Transport and configuration failures collapse to opaque text; the
    /// detailed `Display` output is only ever logged.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Configuration(_) => "Gateway misconfigured".to_string(),
            GatewayError::Transport(e) => e.public_message().to_string(),
            GatewayError::SessionNotFound { .. } => "Session not found".to_string(),
            GatewayError::Validation { details } => details.clone(),
            GatewayError::NotAcceptable => self.to_string(),
            GatewayError::Auth { reason, .. } => reason.clone(),
            GatewayError::Backend { message, .. } => message.clone(),
        }
    }

    /// Shorthand for a validation failure.
    pub fn validation(details: impl Into<String>) -> Self {
        GatewayError::Validation {
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_detail_never_reaches_public_message() {
        let err = GatewayError::from(TransportError::Spawn {
            command: "/opt/secret/bin/server".to_string(),
            reason: "No such file or directory".to_string(),
        });
        assert!(err.to_string().contains("/opt/secret/bin/server"));
        assert!(!err.public_message().contains("secret"));
    }

    #[test]
    fn test_session_not_found_is_opaque() {
        let err = GatewayError::SessionNotFound {
            session_id: "abc".to_string(),
        };
        assert_eq!(err.public_message(), "Session not found");
    }

    #[test]
    fn test_unexpected_exit_without_status() {
        let err = TransportError::unexpected_exit(None);
        assert_eq!(err.to_string(), "Backend exited unexpectedly (unknown)");
    }
}
