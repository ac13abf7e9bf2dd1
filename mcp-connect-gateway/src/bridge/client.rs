//! Bridge clients: one request/response round trip per call against a
//! pooled backend.
//!
//! [`BridgeClient`] and [`BridgeConnector`] are the seam between the cache
//! and the process layer; the cache never touches a subprocess directly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use mcp_connect_core::config::ServerConfig;
use mcp_connect_core::transport::{SessionEvent, ShutdownRequest, StreamSession};
use mcp_connect_core::{GatewayError, JsonRpcId, JsonRpcMessageKind, TransportError, classify_jsonrpc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Session id namespace for bridge-owned backends.
const BRIDGE_SERVER_ID: &str = "bridge";

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// What to launch for a bridge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeTarget {
    pub server_path: String,
    pub args: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
}

/// A live connection to one backend.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    /// Opaque client id, for logs.
    fn id(&self) -> &str;

    /// Send `method` with `params` and wait for the matching response.
    ///
    /// A JSON-RPC error from the backend is `GatewayError::Backend`.
    async fn request(&self, method: &str, params: Value) -> Result<Value, GatewayError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), GatewayError> {
        self.request("ping", json!({})).await.map(|_| ())
    }

    /// Release the backend.
    async fn close(&self) -> Result<(), GatewayError>;
}

/// Creates clients for the cache.
#[async_trait]
pub trait BridgeConnector: Send + Sync {
    async fn connect(&self, target: &BridgeTarget) -> Result<Arc<dyn BridgeClient>, GatewayError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdio Implementation
// ─────────────────────────────────────────────────────────────────────────────

type PendingMap = DashMap<i64, oneshot::Sender<Value>>;

/// A bridge client speaking MCP to a spawned stdio backend.
pub struct StdioBridgeClient {
    id: String,
    session: Arc<StreamSession>,
    pending: Arc<PendingMap>,
    next_request_id: AtomicI64,
    timeout: Duration,
    dispatcher: JoinHandle<()>,
}

impl StdioBridgeClient {
    /// Spawn the backend and complete the MCP `initialize` handshake.
    ///
    /// # Errors
    ///
    /// Spawn failures, handshake errors and timeouts. The backend is closed
    /// before returning an error.
    pub async fn connect(
        target: &BridgeTarget,
        timeout: Duration,
        shutdown: ShutdownRequest,
    ) -> Result<Self, GatewayError> {
        let id = format!("bridge-{}", NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed));
        let config = ServerConfig {
            command: target.server_path.clone(),
            args: target.args.clone().unwrap_or_default(),
            env: target.env.clone().unwrap_or_default(),
            timeout_ms: None,
            retries: None,
        };
        let session = StreamSession::new(id.clone(), BRIDGE_SERVER_ID, Arc::new(config), shutdown);
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let dispatcher = spawn_dispatcher(&session, Arc::clone(&pending));

        let client = Self {
            id,
            session,
            pending,
            next_request_id: AtomicI64::new(1),
            timeout,
            dispatcher,
        };

        if let Err(e) = client.initialize().await {
            client.shutdown().await;
            return Err(e);
        }
        tracing::info!(client_id = %client.id, command = %target.server_path, "bridge client connected");
        Ok(client)
    }

    async fn initialize(&self) -> Result<(), GatewayError> {
        self.session.ensure_started().await?;
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcp-connect",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        self.call("initialize", params).await?;
        self.session
            .send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await?;
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        let message = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": method,
            "params": params,
        });
        if let Err(e) = self.session.send(&message).await {
            self.pending.remove(&request_id);
            return Err(e.into());
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(TransportError::SessionClosed.into()),
            Err(_) => {
                self.pending.remove(&request_id);
                let millis = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                return Err(TransportError::Timeout { millis }.into());
            }
        };

        into_result(response)
    }

    async fn shutdown(&self) {
        self.session.close().await;
        self.dispatcher.abort();
        self.pending.clear();
    }
}

/// Split a JSON-RPC response into its result or a `Backend` error.
fn into_result(mut response: Value) -> Result<Value, GatewayError> {
    if let Some(error) = response.get("error") {
        return Err(GatewayError::Backend {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(-32603),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string(),
            data: error.get("data").cloned(),
        });
    }
    Ok(response
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// Route backend responses to the waiting callers.
fn spawn_dispatcher(session: &Arc<StreamSession>, pending: Arc<PendingMap>) -> JoinHandle<()> {
    let mut events = session.subscribe();
    let client_id = session.id().to_string();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Message(message) => match classify_jsonrpc(&message) {
                    Ok(JsonRpcMessageKind::Response {
                        id: JsonRpcId::Number(n),
                    }) => {
                        if let Some((_, waiter)) = pending.remove(&n) {
                            let _ = waiter.send(message);
                        }
                    }
                    Ok(kind) => {
                        tracing::debug!(%client_id, method = kind.method(), "ignoring backend message");
                    }
                    Err(e) => tracing::debug!(%client_id, error = %e, "ignoring unclassifiable message"),
                },
                SessionEvent::Error(e) => {
                    tracing::warn!(%client_id, error = %e, "bridge backend failed");
                }
                SessionEvent::Closed => break,
            }
        }
        // Dropping the senders fails every outstanding call.
        pending.clear();
    })
}

#[async_trait]
impl BridgeClient for StdioBridgeClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        self.call(method, params).await
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.shutdown().await;
        tracing::debug!(client_id = %self.id, "bridge client closed");
        Ok(())
    }
}

/// Connector that spawns a [`StdioBridgeClient`] per target.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    pub request_timeout: Duration,
    pub shutdown: ShutdownRequest,
}

#[async_trait]
impl BridgeConnector for StdioConnector {
    async fn connect(&self, target: &BridgeTarget) -> Result<Arc<dyn BridgeClient>, GatewayError> {
        let client = StdioBridgeClient::connect(target, self.request_timeout, self.shutdown).await?;
        Ok(Arc::new(client))
    }
}
