//! Backend scripts and session builders shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mcp_connect_core::config::ServerConfig;
use mcp_connect_core::transport::{SessionEvent, ShutdownRequest, Subscription};

/// Answers every request line with `{"id":..,"jsonrpc":"2.0","result":{"method":..}}`.
///
/// Relies on serde_json emitting object keys in sorted order, which puts
/// `id` and `jsonrpc` ahead of `method`. Lines without an id are swallowed.
const ECHO_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    '{"id":'*'"method":'*)
      printf '%s\n' "$line" | sed -e 's/^\({"id":[^,]*,"jsonrpc":"2.0"\),"method":"\([^"]*\)".*$/\1,"result":{"method":"\2"}}/'
      ;;
  esac
done
"#;

/// Write an executable script into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn write_echo_script(dir: &Path) -> PathBuf {
    write_script(dir, "echo_server.sh", ECHO_SCRIPT)
}

pub fn echo_server(dir: &Path) -> Arc<ServerConfig> {
    let script = write_echo_script(dir);
    Arc::new(ServerConfig::new(script.to_string_lossy(), vec![]))
}

/// A backend running an inline `sh -c` program.
pub fn sh_server(program: &str) -> Arc<ServerConfig> {
    Arc::new(ServerConfig::new(
        "sh",
        vec!["-c".to_string(), program.to_string()],
    ))
}

pub fn fast_shutdown() -> ShutdownRequest {
    ShutdownRequest {
        stdin_close_grace: Duration::from_millis(200),
        sigterm_grace: Duration::from_millis(200),
    }
}

/// Next event, failing the test after two seconds.
pub async fn next_event(sub: &mut Subscription) -> Option<SessionEvent> {
    tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("timed out waiting for session event")
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
