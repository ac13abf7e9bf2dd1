//! Liveness and metrics endpoints.
//!
//! | Endpoint   | Auth     | Body |
//! |------------|----------|------|
//! | `/health`  | exempt   | `{"status":"ok"}` |
//! | `/metrics` | required | OpenMetrics text |

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;

use crate::server::GatewayState;

pub fn routes() -> Router<GatewayState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
}

async fn health_handler() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

async fn metrics_handler(State(state): State<GatewayState>) -> Response {
    let mut buffer = String::new();
    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &state.prom_registry) {
        tracing::error!(error = %e, "failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}
