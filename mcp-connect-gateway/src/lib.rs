//! HTTP surface of the MCP connect gateway.
//!
//! Two ways to reach a stdio MCP server over HTTP:
//!
//! - **Bridge** (`POST /bridge`): stateless, one JSON-RPC round trip per call
//!   against a pooled backend keyed by (server path, args, env).
//! - **Streamable** (`/mcp/{server_id}`): session-oriented; requests are
//!   answered over Server-Sent Events, correlated by JSON-RPC id.

pub mod auth;
pub mod bridge;
pub mod cli;
pub mod error;
pub mod health;
pub mod server;
pub mod streamable;

pub use error::{ApiError, StartupError};
pub use server::{Gateway, GatewayState};
