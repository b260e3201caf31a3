//! Responses produced by the security pipeline.
//!
//! # Design Decisions
//! - Error bodies are JSON `{ "error", "message" }` with safe messages only
//! - Redirects are 302 so browsers re-issue a GET

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;

/// JSON error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

pub fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

/// 302 to `location`.
pub fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            tracing::error!(location = %location, "Refusing to redirect to an invalid location");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "An internal error occurred")
        }
    }
}

/// 401 with an optional `WWW-Authenticate` challenge.
pub fn unauthorized(challenge: Option<&str>, message: &str) -> Response {
    let mut response = error_response(StatusCode::UNAUTHORIZED, "unauthorized", message);
    if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(c).ok()) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

pub fn forbidden(message: &str) -> Response {
    error_response(StatusCode::FORBIDDEN, "forbidden", message)
}

/// 429 with `Retry-After` in whole seconds (rounded up).
pub fn too_many_requests(retry_after: Duration, message: &str) -> Response {
    let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message);
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect() {
        let response = redirect("/login");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[test]
    fn test_unauthorized_challenge() {
        let response = unauthorized(Some("Basic realm=\"Secured\""), "nope");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic realm=\"Secured\"");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let response = too_many_requests(Duration::from_millis(1500), "slow down");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }
}
