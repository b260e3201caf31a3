//! Exception boundary: turns a listener failure into a response.
//!
//! # Mapping
//! ```text
//! CookieTheft              → invalidate token + session, then entry point
//! TooManyAttempts          → 429 + Retry-After
//! other authentication     → entry point (redirect to login / 401)
//! AccessDenied, anonymous  → entry point (InsufficientAuthentication)
//! AccessDenied, remembered → entry point (InsufficientAuthentication)
//! AccessDenied, full login → 403
//! ```
//!
//! Nothing raised by a listener reaches the application handler.

use axum::response::Response;

use crate::http::response::{forbidden, too_many_requests, unauthorized};
use crate::observability::metrics;
use crate::security::error::{AccessDeniedError, AuthenticationError, SecurityError};
use crate::security::firewall::Exchange;
use crate::security::token::AuthenticationToken;

pub fn handle(exchange: &mut Exchange, error: &SecurityError) -> Response {
    match error {
        SecurityError::Authentication(e) => handle_authentication(exchange, e),
        SecurityError::AccessDenied(e) => handle_access_denied(exchange, e),
    }
}

fn handle_authentication(exchange: &mut Exchange, error: &AuthenticationError) -> Response {
    match error {
        AuthenticationError::CookieTheft => {
            tracing::warn!(
                firewall = %exchange.firewall_name(),
                client_ip = %exchange.request.client_ip(),
                security_event = "cookie_theft",
                "Remember-me cookie theft detected, invalidating session"
            );
            metrics::record_cookie_theft(exchange.firewall_name());
            if let Err(e) = exchange.token_storage.reset() {
                tracing::error!(error = %e, "Failed to clear token after cookie theft");
            }
            if let Some(session) = &exchange.session {
                if let Err(e) = session.invalidate() {
                    tracing::error!(error = %e, "Failed to invalidate session after cookie theft");
                }
            }
            start_authentication(exchange, error)
        }
        AuthenticationError::TooManyAttempts { retry_after } => {
            too_many_requests(*retry_after, error.safe_message())
        }
        AuthenticationError::AccountDisabled => {
            if let Err(e) = exchange.token_storage.reset() {
                tracing::error!(error = %e, "Failed to clear token of disabled account");
            }
            start_authentication(exchange, error)
        }
        _ => start_authentication(exchange, error),
    }
}

fn handle_access_denied(exchange: &mut Exchange, error: &AccessDeniedError) -> Response {
    let token = exchange.token_storage.get_token();
    if token.as_ref().map_or(true, AuthenticationToken::is_remembered) {
        tracing::debug!(subject = %error.subject, "Access denied, starting authentication");
        return start_authentication(exchange, &AuthenticationError::InsufficientAuthentication);
    }
    tracing::info!(
        firewall = %exchange.firewall_name(),
        subject = %error.subject,
        user = token.as_ref().map(|t| t.identifier()).unwrap_or_default(),
        "Access denied"
    );
    forbidden("Access denied.")
}

/// The first authenticator's entry point, or a bare 401.
fn start_authentication(exchange: &Exchange, error: &AuthenticationError) -> Response {
    match exchange.context.authenticators().first() {
        Some(authenticator) => authenticator.entry_point(&exchange.request, exchange.session.as_ref()),
        None => unauthorized(None, error.safe_message()),
    }
}
