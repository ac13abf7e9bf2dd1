//! Stream session tests against real shell backends.

#![cfg(unix)]

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{echo_server, fast_shutdown, next_event, sh_server, wait_until};
use mcp_connect_core::TransportError;
use mcp_connect_core::transport::{SessionEvent, SessionState, StreamSession};
use serde_json::json;

fn session(config: Arc<mcp_connect_core::config::ServerConfig>) -> Arc<StreamSession> {
    StreamSession::new("s-1", "srv", config, fast_shutdown())
}

// ─────────────────────────────────────────────────────────────────────────────
// Round trips
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_send_starts_backend_and_surfaces_response() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(echo_server(dir.path()));
    assert_eq!(session.state(), SessionState::Created);

    let mut events = session.subscribe();
    session
        .send(&json!({"jsonrpc": "2.0", "id": "1", "method": "ping", "params": {}}))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Started);

    match next_event(&mut events).await {
        Some(SessionEvent::Message(value)) => {
            assert_eq!(value, json!({"jsonrpc": "2.0", "id": "1", "result": {"method": "ping"}}));
        }
        other => panic!("expected message, got {other:?}"),
    }

    session.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_messages_keep_backend_order() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(echo_server(dir.path()));
    let mut events = session.subscribe();

    for id in 1..=5 {
        session
            .send(&json!({"jsonrpc": "2.0", "id": id, "method": "tools/list"}))
            .await
            .unwrap();
    }
    for id in 1..=5 {
        match next_event(&mut events).await {
            Some(SessionEvent::Message(value)) => assert_eq!(value["id"], id),
            other => panic!("expected message, got {other:?}"),
        }
    }

    session.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_non_json_lines_skipped_and_arrays_split() {
    let session = session(sh_server(
        r#"echo "starting up"; echo '[{"jsonrpc":"2.0","method":"a"},{"jsonrpc":"2.0","method":"b"}]'; cat >/dev/null"#,
    ));
    let mut events = session.subscribe();
    session.ensure_started().await.unwrap();

    for expected in ["a", "b"] {
        match next_event(&mut events).await {
            Some(SessionEvent::Message(value)) => assert_eq!(value["method"], expected),
            other => panic!("expected message, got {other:?}"),
        }
    }

    session.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stderr_is_not_surfaced() {
    let session = session(sh_server(
        r#"echo '{"not":"protocol"}' >&2; echo '{"jsonrpc":"2.0","method":"ready"}'; cat >/dev/null"#,
    ));
    let mut events = session.subscribe();
    session.ensure_started().await.unwrap();

    match next_event(&mut events).await {
        Some(SessionEvent::Message(value)) => assert_eq!(value["method"], "ready"),
        other => panic!("expected message, got {other:?}"),
    }

    session.close().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Start
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_ensure_started_spawns_once() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("starts");
    let config = Arc::new(mcp_connect_core::config::ServerConfig::new(
        "sh",
        vec![
            "-c".to_string(),
            r#"echo started >> "$0"; cat >/dev/null"#.to_string(),
            marker.to_string_lossy().into_owned(),
        ],
    ));
    let session = session(config);

    let starts: Vec<_> = (0..5)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.ensure_started().await })
        })
        .collect();
    for start in starts {
        start.await.unwrap().unwrap();
    }

    wait_until(|| marker.exists()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let contents = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(contents.lines().count(), 1);

    session.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spawn_failure_reports_error_and_closes() {
    let session = session(Arc::new(mcp_connect_core::config::ServerConfig::new(
        "/nonexistent/mcp-server",
        vec![],
    )));
    let mut events = session.subscribe();

    let err = session.ensure_started().await.unwrap_err();
    assert!(matches!(err, TransportError::Spawn { .. }));

    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Error(_))));
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Closed)));
    assert_eq!(session.state(), SessionState::Closed);
}

// ─────────────────────────────────────────────────────────────────────────────
// Close
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_unexpected_exit_emits_error_then_closed() {
    let session = session(sh_server("exit 3"));
    let mut events = session.subscribe();
    session.ensure_started().await.unwrap();

    match next_event(&mut events).await {
        Some(SessionEvent::Error(e)) => {
            assert!(matches!(*e, TransportError::UnexpectedExit { .. }));
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Closed)));
    assert!(next_event(&mut events).await.is_none());
    assert!(session.is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_is_idempotent_and_final() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(echo_server(dir.path()));
    let mut events = session.subscribe();
    session.ensure_started().await.unwrap();

    tokio::join!(session.close(), session.close(), session.close());
    session.close().await;

    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Closed)));
    assert!(next_event(&mut events).await.is_none());
    assert_eq!(session.subscriber_count(), 0);

    let err = session
        .send(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::SessionClosed));

    // Starting a closed session is a no-op.
    session.ensure_started().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_is_not_blocked_by_a_stalled_write() {
    let session = session(sh_server("sleep 30"));
    session.ensure_started().await.unwrap();

    // Far larger than a pipe buffer; the backend never reads it.
    let blob = "x".repeat(1024 * 1024);
    let writer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .send(&json!({"jsonrpc": "2.0", "method": "upload", "params": {"blob": blob}}))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!writer.is_finished());

    tokio::time::timeout(Duration::from_secs(5), session.close())
        .await
        .expect("close waited on the stalled writer");
    assert!(session.is_closed());

    let written = tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .expect("stalled write never failed")
        .unwrap();
    assert!(written.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_before_start_never_spawns() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(echo_server(dir.path()));
    session.close().await;
    session.ensure_started().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_subscription_is_detached() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(echo_server(dir.path()));
    let first = session.subscribe();
    let _second = session.subscribe();
    assert_eq!(session.subscriber_count(), 2);
    drop(first);
    assert_eq!(session.subscriber_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_send_refreshes_last_used() {
    let dir = tempfile::tempdir().unwrap();
    let session = session(echo_server(dir.path()));
    let before = session.last_used();
    tokio::time::sleep(Duration::from_millis(20)).await;
    session
        .send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await
        .unwrap();
    assert!(session.last_used() > before);
    session.close().await;
}
