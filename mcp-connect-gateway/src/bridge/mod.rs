//! Stateless bridge path: `POST /bridge`.
//!
//! Each call names the backend inline (`serverPath`, `args`, `env`) and runs
//! exactly one JSON-RPC round trip against a pooled client from
//! [`BridgeCache`].

pub mod cache;
pub mod client;

pub use cache::{BridgeCache, fingerprint};
pub use client::{
    BridgeClient, BridgeConnector, BridgeTarget, PROTOCOL_VERSION, StdioBridgeClient,
    StdioConnector,
};

use std::collections::BTreeMap;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use mcp_connect_core::GatewayError;
use mcp_connect_core::transport::env::mask_env;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::server::GatewayState;

const INVALID_BODY: &str =
    "Invalid request body. Required: serverPath, method, params. Optional: args";
const PROCESSING_FAILED: &str = "Failed to process request";

/// Body of `POST /bridge`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeRequest {
    server_path: Option<String>,
    method: Option<String>,
    params: Option<Value>,
    args: Option<Vec<String>>,
    env: Option<BTreeMap<String, String>>,
}

/// A validated bridge call.
#[derive(Debug)]
struct BridgeCall {
    target: BridgeTarget,
    method: String,
    params: Value,
}

impl BridgeRequest {
    fn into_call(self) -> Option<BridgeCall> {
        let server_path = self.server_path.filter(|s| !s.is_empty())?;
        let method = self.method.filter(|m| !m.is_empty())?;
        let params = self.params.filter(|p| !p.is_null())?;
        Some(BridgeCall {
            target: BridgeTarget {
                server_path,
                args: self.args,
                env: self.env,
            },
            method,
            params,
        })
    }
}

fn parse_call(body: &[u8]) -> Result<BridgeCall, ApiError> {
    serde_json::from_slice::<BridgeRequest>(body)
        .ok()
        .and_then(BridgeRequest::into_call)
        .ok_or_else(|| ApiError::bad_request(INVALID_BODY))
}

pub fn routes() -> Router<GatewayState> {
    Router::new().route("/bridge", post(handle_bridge))
}

async fn handle_bridge(State(state): State<GatewayState>, body: Bytes) -> Response {
    let call = match parse_call(&body) {
        Ok(call) => call,
        Err(e) => return e.into_response(),
    };

    tracing::info!(
        server_path = %call.target.server_path,
        method = %call.method,
        args = ?call.target.args,
        env = ?call.target.env.as_ref().map(mask_env),
        "bridge request"
    );

    match state
        .bridge
        .execute(&call.target, &call.method, call.params)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(GatewayError::Backend {
            code,
            message,
            data,
        }) => {
            tracing::debug!(code, %message, method = %call.method, "backend returned JSON-RPC error");
            let mut error = json!({ "code": code, "message": message });
            if let Some(data) = data {
                error["data"] = data;
            }
            (StatusCode::OK, Json(json!({ "error": error }))).into_response()
        }
        Err(e) => ApiError::internal(PROCESSING_FAILED, &e).into_response(),
    }
}
