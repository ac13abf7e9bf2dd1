//! Core of the MCP connect gateway.
//!
//! Transport-agnostic pieces shared by the HTTP surface: JSON-RPC
//! classification, the error taxonomy, configuration, the stdio subprocess
//! transport, the session registry and metrics.

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod metrics;
pub mod session;
pub mod transport;

pub use error::{GatewayError, TransportError};
pub use jsonrpc::{JsonRpcId, JsonRpcMessage, JsonRpcMessageKind, classify_jsonrpc};
