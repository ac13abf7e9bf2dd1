//! Streamable HTTP path: `/mcp/{server_id}`.
//!
//! A POST carrying requests opens an SSE response that stays up until every
//! request in the batch has been answered. A POST carrying only notifications
//! or responses is forwarded and acknowledged with 202. The session id travels
//! in the `mcp-session-id` header in both directions.

pub mod correlator;

pub use correlator::{FrameKind, SseFrame, Step, StreamCorrelator};

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use mcp_connect_core::jsonrpc::{contains_requests, parse_batch};
use mcp_connect_core::metrics::GatewayMetrics;
use mcp_connect_core::transport::{SessionEvent, StreamSession, Subscription};
use mcp_connect_core::{GatewayError, JsonRpcMessage};
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::server::GatewayState;

/// Request and response header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

const SESSION_HEADER_REQUIRED: &str = "mcp-session-id header required";
const SESSION_REQUIRED_WITHOUT_REQUESTS: &str =
    "mcp-session-id header required when request body has no requests";
const ESTABLISH_FAILED: &str = "Failed to establish session with MCP server";
const FORWARD_MESSAGES_FAILED: &str = "Failed to forward messages to MCP server";
const FORWARD_REQUEST_FAILED: &str = "Failed to forward request to MCP server";

/// Frames buffered between the pump and the HTTP body.
const STREAM_BUFFER: usize = 32;

pub fn routes() -> Router<GatewayState> {
    Router::new().route(
        "/mcp/{server_id}",
        post(handle_post).get(handle_get).delete(handle_delete),
    )
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

/// Both the bulk JSON and the event-stream shapes must be accepted.
fn accepts_streamable(headers: &HeaderMap) -> bool {
    let media_types: Vec<String> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|item| item.split(';').next())
        .map(|media_type| media_type.trim().to_ascii_lowercase())
        .filter(|media_type| !media_type.is_empty())
        .collect();
    let has = |wanted: &str| media_types.iter().any(|m| m == wanted);
    has("application/json") && has("text/event-stream")
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn handle_post(
    State(state): State<GatewayState>,
    Path(server_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match post_inner(&state, &server_id, &headers, &body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn post_inner(
    state: &GatewayState,
    server_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    let Some(server) = state.config.server(server_id).cloned() else {
        return Err(ApiError::not_found(format!("Unknown MCP server: {server_id}")));
    };
    if !accepts_streamable(headers) {
        return Err(GatewayError::NotAcceptable.into());
    }
    let messages =
        parse_batch(body).map_err(|e| ApiError::from(GatewayError::validation(e.to_string())))?;
    let has_requests = contains_requests(&messages);

    let session = match session_header(headers) {
        None if !has_requests => {
            return Err(ApiError::bad_request(SESSION_REQUIRED_WITHOUT_REQUESTS));
        }
        None => state
            .sessions
            .create_session(server_id, server)
            .await
            .map_err(|e| ApiError::internal(ESTABLISH_FAILED, &e))?,
        Some(session_id) => {
            let session = state
                .sessions
                .get_session(&session_id, server_id)
                .ok_or_else(|| ApiError::from(GatewayError::SessionNotFound { session_id }))?;
            session
                .ensure_started()
                .await
                .map_err(|e| ApiError::internal(ESTABLISH_FAILED, &e))?;
            session
        }
    };

    if !has_requests {
        for message in &messages {
            session
                .send(&message.value)
                .await
                .map_err(|e| ApiError::internal(FORWARD_MESSAGES_FAILED, &e))?;
        }
        tracing::debug!(
            session_id = %session.id(),
            server_id,
            count = messages.len(),
            "forwarded messages without requests"
        );
        return Ok(with_session_header(
            StatusCode::ACCEPTED.into_response(),
            session.id(),
        ));
    }

    Ok(open_stream(session, messages, state.metrics.clone()))
}

/// Start the pump and hand its output to an SSE response.
///
/// The subscription is taken before anything is forwarded so no response can
/// slip past the stream.
fn open_stream(
    session: Arc<StreamSession>,
    messages: Vec<JsonRpcMessage>,
    metrics: GatewayMetrics,
) -> Response {
    let correlator = StreamCorrelator::from_batch(&messages);
    let events = session.subscribe();
    let (tx, rx) = mpsc::channel::<Event>(STREAM_BUFFER);
    let session_id = session.id().to_string();

    metrics.sse_streams_opened.inc();
    tracing::debug!(
        %session_id,
        server_id = %session.server_id(),
        pending = correlator.pending_len(),
        "opening event stream"
    );
    tokio::spawn(pump(session, messages, correlator, events, tx, metrics));

    let body = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });
    let response = Sse::new(body).keep_alive(KeepAlive::default()).into_response();
    with_session_header(response, &session_id)
}

/// Forward the batch, then relay session events until the correlator closes
/// the stream or the client goes away. Returning drops the subscription.
async fn pump(
    session: Arc<StreamSession>,
    messages: Vec<JsonRpcMessage>,
    mut correlator: StreamCorrelator,
    mut events: Subscription,
    tx: mpsc::Sender<Event>,
    metrics: GatewayMetrics,
) {
    for message in &messages {
        if let Err(e) = session.send(&message.value).await {
            tracing::warn!(session_id = %session.id(), error = %e, "failed to forward request");
            let step = correlator.on_error(FORWARD_REQUEST_FAILED);
            emit(&tx, &metrics, step).await;
            return;
        }
    }

    loop {
        let step = tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Message(message)) => correlator.on_message(message),
                Some(SessionEvent::Error(e)) => {
                    tracing::warn!(session_id = %session.id(), error = %e, "session failed during stream");
                    correlator.on_error(e.public_message())
                }
                Some(SessionEvent::Closed) | None => correlator.on_closed(),
            },
            () = tx.closed() => {
                tracing::debug!(session_id = %session.id(), "client disconnected");
                correlator.on_closed()
            }
        };
        let close = step.close;
        if !emit(&tx, &metrics, step).await || close {
            break;
        }
    }
    tracing::debug!(session_id = %session.id(), "event stream closed");
}

/// Write the frame of `step`, if any. False once the client is gone.
async fn emit(tx: &mpsc::Sender<Event>, metrics: &GatewayMetrics, step: Step) -> bool {
    let Some(frame) = step.frame else {
        return true;
    };
    let kind = frame.kind;
    if tx.send(frame.into_event()).await.is_err() {
        return false;
    }
    metrics.record_sse_event(kind.as_str());
    true
}

async fn handle_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "GET not supported for MCP endpoint" })),
    )
        .into_response()
}

async fn handle_delete(
    State(state): State<GatewayState>,
    Path(server_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return ApiError::bad_request(SESSION_HEADER_REQUIRED).into_response();
    };
    if state.sessions.close_session_for(&session_id, &server_id).await {
        tracing::info!(%session_id, %server_id, "session closed by client");
    }
    StatusCode::NO_CONTENT.into_response()
}
