//! Origin allow-list and bearer-token middleware.
//!
//! Both checks run in front of every route except `/health`. An empty
//! allow-list admits every origin; an unset token disables authentication.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use mcp_connect_core::GatewayError;
use mcp_connect_core::config::SecurityConfig;

use crate::error::ApiError;
use crate::server::GatewayState;

const EXEMPT_PATHS: &[&str] = &["/health"];

/// Check `Origin` against the allow-list, then the bearer token.
///
/// # Errors
///
/// `GatewayError::Auth` with status 403 for a rejected origin and 401 for a
/// missing, malformed or wrong token.
pub fn authorize(security: &SecurityConfig, headers: &HeaderMap) -> Result<(), GatewayError> {
    check_origin(security, headers)?;
    check_token(security, headers)
}

fn check_origin(security: &SecurityConfig, headers: &HeaderMap) -> Result<(), GatewayError> {
    if security.allowed_origins.is_empty() {
        return Ok(());
    }
    let Some(origin) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    let allowed = origin
        .to_str()
        .is_ok_and(|origin| security.allowed_origins.iter().any(|o| o == origin));
    if allowed {
        Ok(())
    } else {
        Err(auth_error(403, "Origin not allowed"))
    }
}

fn check_token(security: &SecurityConfig, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(expected) = security.auth_token.as_deref() else {
        return Ok(());
    };
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(auth_error(401, "Authorization header is required"));
    };
    let raw = value.to_str().unwrap_or_default().trim();
    let (scheme, token) = raw.split_once(' ').unwrap_or((raw, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(auth_error(401, "Authorization type must be Bearer"));
    }
    if !constant_time_eq(token.trim(), expected) {
        return Err(auth_error(401, "Invalid access token"));
    }
    Ok(())
}

fn auth_error(status: u16, reason: &str) -> GatewayError {
    GatewayError::Auth {
        status,
        reason: reason.to_string(),
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(left: &str, right: &str) -> bool {
    let left = left.as_bytes();
    let right = right.as_bytes();
    let mut diff = left.len() ^ right.len();
    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        diff |= usize::from(l ^ r);
    }
    diff == 0
}

/// Axum middleware applying [`authorize`].
pub async fn require_auth(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }
    if let Err(e) = authorize(&state.config.security, request.headers()) {
        tracing::warn!(
            path = %request.uri().path(),
            error = %e,
            "rejected unauthorized request"
        );
        return ApiError::from(e).into_response();
    }
    next.run(request).await
}
