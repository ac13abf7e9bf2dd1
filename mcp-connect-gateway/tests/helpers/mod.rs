//! Shared fixtures for the gateway integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use mcp_connect_core::config::{GatewayConfig, ServerConfig};
use mcp_connect_core::transport::ShutdownRequest;
use mcp_connect_gateway::Gateway;
use serde_json::Value;
use tower::ServiceExt;

pub const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Scripted MCP backend.
///
/// Every request is answered with `{"result":{"method":<method>}}` except:
/// `fail` answers with a JSON-RPC error, `notify` sends a progress
/// notification first, `hang` is never answered and `crash` exits the
/// process. Lines without an id are ignored.
///
/// Relies on serde_json writing object keys in sorted order, so `id` is the
/// first key of every request the gateway forwards.
const BACKEND_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"id":\([^,]*\),.*$/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"fail"'*)
      printf '{"error":{"code":-32000,"message":"boom"},"id":%s,"jsonrpc":"2.0"}\n' "$id"
      ;;
    *'"method":"notify"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":1}}\n'
      printf '{"id":%s,"jsonrpc":"2.0","result":{"method":"notify"}}\n' "$id"
      ;;
    *'"method":"hang"'*)
      ;;
    *'"method":"crash"'*)
      exit 1
      ;;
    *'"method":"'*)
      method=$(printf '%s\n' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
      printf '{"id":%s,"jsonrpc":"2.0","result":{"method":"%s"}}\n' "$id" "$method"
      ;;
  esac
done
"#;

pub fn write_backend(dir: &Path) -> PathBuf {
    let path = dir.join("mcp_backend.sh");
    std::fs::write(&path, BACKEND_SCRIPT).unwrap();
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn fast_shutdown() -> ShutdownRequest {
    ShutdownRequest {
        stdin_close_grace: Duration::from_millis(200),
        sigterm_grace: Duration::from_millis(200),
    }
}

/// Config with the scripted backend registered under each of `server_ids`.
pub fn config_with_servers(backend: &Path, server_ids: &[&str]) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.shutdown = fast_shutdown();
    for id in server_ids {
        config.streamable.servers.insert(
            id.to_string(),
            Arc::new(ServerConfig::new(backend.to_string_lossy(), vec![])),
        );
    }
    config
}

pub struct TestGateway {
    pub gateway: Gateway,
    pub router: Router,
    pub backend: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestGateway {
    pub fn new(configure: impl FnOnce(&mut GatewayConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let backend = write_backend(dir.path());
        let mut config = config_with_servers(&backend, &["echo", "other"]);
        configure(&mut config);
        let gateway = Gateway::with_stdio(config);
        let router = gateway.router();
        Self {
            gateway,
            router,
            backend,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = collect(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(collect(response).await).unwrap()
}

async fn collect(response: Response<Body>) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("timed out reading response body")
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// One parsed SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    pub id: u64,
    pub data: Value,
}

/// Parse an SSE body, skipping keep-alive comments.
pub fn parse_frames(body: &str) -> Vec<Frame> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut id = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event: ") {
                    event = Some(v.to_string());
                } else if let Some(v) = line.strip_prefix("id: ") {
                    id = v.parse().ok();
                } else if let Some(v) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(v).ok();
                }
            }
            Some(Frame {
                event: event?,
                id: id?,
                data: data?,
            })
        })
        .collect()
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
