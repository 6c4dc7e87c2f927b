use crate::error::{AppError, AppResult, LoggedJson};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Header carrying the shared secret for the data-fetching script.
pub const INTERNAL_HEADER: &str = "x-internal-password";
/// Header carrying the monitoring key for `/api/status`.
pub const STATUS_KEY_HEADER: &str = "x-api-key";

/// Constant-time comparison of a presented credential against a configured
/// secret. Both sides are hashed first so lengths do not leak. An empty
/// secret never matches.
pub fn secret_matches(provided: Option<&str>, secret: &str) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    if secret.is_empty() {
        return false;
    }
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(secret.as_bytes());
    a.ct_eq(&b).into()
}

/// Extract Bearer token from Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").filter(|t| !t.is_empty())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

pub fn is_admin(headers: &HeaderMap, state: &AppState) -> bool {
    secret_matches(bearer_token(headers), &state.config.auth.admin_password)
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// Middleware: admin routes need `Authorization: Bearer <admin password>`.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    if !is_admin(request.headers(), &state) {
        tracing::warn!(path = %request.uri().path(), "admin auth failed");
        return Err(unauthorized("unauthorized"));
    }
    Ok(next.run(request).await)
}

/// Middleware: internal routes need the `x-internal-password` header.
pub async fn require_internal(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let provided = header_value(request.headers(), INTERNAL_HEADER);
    if !secret_matches(provided, &state.config.auth.internal_password) {
        tracing::warn!(path = %request.uri().path(), "internal auth failed");
        return Err(unauthorized("unauthorized"));
    }
    Ok(next.run(request).await)
}

/// Middleware: the status endpoint needs the `x-api-key` header.
pub async fn require_status_key(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let provided = header_value(request.headers(), STATUS_KEY_HEADER);
    if !secret_matches(provided, &state.config.auth.status_api_key) {
        return Err(unauthorized("invalid api key"));
    }
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
pub struct AuthCheck {
    #[serde(default)]
    pub password: String,
}

/// POST /api/auth/check - Admin panel login.
pub async fn auth_check(
    State(state): State<Arc<AppState>>,
    LoggedJson(body): LoggedJson<AuthCheck>,
) -> AppResult<Json<serde_json::Value>> {
    if secret_matches(Some(&body.password), &state.config.auth.admin_password) {
        Ok(Json(serde_json::json!({ "success": true })))
    } else {
        tracing::warn!("admin login rejected");
        Err(AppError::Auth("invalid password".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches(Some("hunter2"), "hunter2"));
        assert!(!secret_matches(Some("hunter"), "hunter2"));
        assert!(!secret_matches(None, "hunter2"));
        assert!(!secret_matches(Some(""), ""));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
