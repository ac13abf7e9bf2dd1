//! `POST /bridge` tests against a scripted stdio backend.

#![cfg(unix)]

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use helpers::{TestGateway, body_json};
use serde_json::{Value, json};

fn bridge(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/bridge")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_fields_are_400() {
    let gw = TestGateway::new(|_| {});
    let response = gw.send(bridge(json!({"method": "tools/list", "params": {}}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Invalid request body. Required: serverPath, method, params. Optional: args"})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_round_trip_and_client_reuse() {
    let gw = TestGateway::new(|_| {});
    let path = gw.backend.to_string_lossy().to_string();
    let call = json!({
        "serverPath": path,
        "method": "tools/list",
        "params": {},
        "env": {"API_KEY": "sk-test-123456"},
    });

    let response = gw.send(bridge(call.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"method": "tools/list"}));

    let response = gw.send(bridge(call)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let state = gw.gateway.state();
    assert_eq!(state.bridge.len(), 1);
    assert_eq!(state.metrics.bridge_cache_misses.get(), 1);
    assert_eq!(state.metrics.bridge_cache_hits.get(), 1);

    gw.gateway.shutdown().await;
    assert!(state.bridge.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_distinct_args_use_distinct_clients() {
    let gw = TestGateway::new(|_| {});
    let path = gw.backend.to_string_lossy().to_string();
    for args in [json!(["a"]), json!(["b"])] {
        let response = gw
            .send(bridge(json!({
                "serverPath": path,
                "method": "ping",
                "params": {},
                "args": args,
            })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(gw.gateway.state().bridge.len(), 2);
    gw.gateway.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backend_error_is_returned_as_json_rpc_error() {
    let gw = TestGateway::new(|_| {});
    let response = gw
        .send(bridge(json!({
            "serverPath": gw.backend.to_string_lossy(),
            "method": "fail",
            "params": {},
        })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"error": {"code": -32000, "message": "boom"}})
    );
    gw.gateway.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spawn_failure_is_opaque_500() {
    let gw = TestGateway::new(|_| {});
    let response = gw
        .send(bridge(json!({
            "serverPath": "/nonexistent/secret/mcp-server",
            "method": "tools/list",
            "params": {},
        })))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Failed to process request"})
    );
    assert!(gw.gateway.state().bridge.is_empty());
}
