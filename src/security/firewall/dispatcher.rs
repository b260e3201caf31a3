//! Per-request state machine.
//!
//! ```text
//! Unmatched ──(firewall found)──► Evaluating ──► Authenticated
//!                                           ├──► Denied
//!                                           ├──► Redirected
//!                                           └──► PassThrough
//! ```
//!
//! # Design Decisions
//! - Lazy requests (public path, no credentials, no remember-me cookie, not
//!   logout) skip every listener and only read the stored token
//! - The first `Respond`/`Fail` stops the chain
//! - Throttle buckets are reset only once the whole chain, access decision
//!   included, let a freshly authenticated request through
//! - A success response from an authenticator (the post-login redirect) is
//!   sent only after access was granted

use axum::response::Response;
use std::sync::Arc;

use crate::http::cookie::CookieJar;
use crate::http::request::SecurityRequest;
use crate::observability::metrics;
use crate::security::error::SecurityError;
use crate::security::firewall::listener::ListenerOutcome;
use crate::security::firewall::{exception, Exchange, FirewallMap, FirewallState};
use crate::security::session::Session;
use crate::security::token::AuthenticationToken;
use crate::security::token_storage::TokenStorage;

/// Result of running the firewall for one request.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub firewall: Option<String>,
    pub state: FirewallState,
    /// Terminal response. `None` means the handler runs.
    pub response: Option<Response>,
    /// Token installed at the end of the request.
    pub token: Option<AuthenticationToken>,
    /// Cookies to set on whatever response goes out.
    pub cookies: CookieJar,
    /// The error the exception boundary handled, if any.
    pub error: Option<SecurityError>,
}

impl DispatchOutcome {
    fn unmatched() -> Self {
        Self {
            firewall: None,
            state: FirewallState::Unmatched,
            response: None,
            token: None,
            cookies: CookieJar::default(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.response.is_some()
    }
}

/// Runs the firewall of the matching map entry over a request.
#[derive(Debug, Clone)]
pub struct FirewallDispatcher {
    map: Arc<FirewallMap>,
}

impl FirewallDispatcher {
    pub fn new(map: Arc<FirewallMap>) -> Self {
        Self { map }
    }

    pub fn map(&self) -> &Arc<FirewallMap> {
        &self.map
    }

    /// Run the firewall. `session` is ignored by stateless firewalls.
    pub fn dispatch(&self, request: SecurityRequest, session: Option<Arc<dyn Session>>) -> DispatchOutcome {
        let Some(context) = self.map.context_for(&request) else {
            tracing::debug!(path = %request.path(), "No firewall matched");
            metrics::record_firewall_request(FirewallState::Unmatched.as_str());
            return DispatchOutcome::unmatched();
        };

        let firewall = context.firewall().name().to_string();
        let session = if context.firewall().is_stateless() {
            None
        } else {
            session
        };
        let mut token_storage = TokenStorage::new(firewall.clone(), session.clone());

        if context.is_lazy(&request) {
            let token = token_storage.get_token();
            tracing::debug!(firewall = %firewall, path = %request.path(), "Lazy request, listeners skipped");
            metrics::record_firewall_request(FirewallState::PassThrough.as_str());
            return DispatchOutcome {
                firewall: Some(firewall),
                state: FirewallState::PassThrough,
                response: None,
                token,
                cookies: CookieJar::default(),
                error: None,
            };
        }

        let listeners = context.listeners(&request);
        let mut exchange = Exchange::new(request, context, token_storage, session);
        tracing::debug!(
            firewall = %firewall,
            state = %FirewallState::Evaluating,
            listeners = listeners.len(),
            "Evaluating request"
        );

        for listener in listeners {
            match listener.handle(&mut exchange) {
                ListenerOutcome::Continue => {}
                ListenerOutcome::Respond(response) => {
                    tracing::debug!(listener = listener.name(), status = %response.status(), "Listener responded");
                    let state = if response.status().is_redirection() {
                        FirewallState::Redirected
                    } else {
                        FirewallState::Denied
                    };
                    return finish(exchange, state, Some(response), None);
                }
                ListenerOutcome::Fail(error) => {
                    tracing::debug!(listener = listener.name(), error = %error, "Listener failed");
                    let response = exception::handle(&mut exchange, &error);
                    let state = if response.status().is_redirection() {
                        FirewallState::Redirected
                    } else {
                        FirewallState::Denied
                    };
                    return finish(exchange, state, Some(response), Some(error));
                }
            }
        }

        if exchange.authenticated_now {
            reset_throttling(&exchange);
        }

        match exchange.deferred_response.take() {
            Some(response) => finish(exchange, FirewallState::Redirected, Some(response), None),
            None => {
                let state = if exchange.token_storage.get_token().is_some() {
                    FirewallState::Authenticated
                } else {
                    FirewallState::PassThrough
                };
                finish(exchange, state, None, None)
            }
        }
    }
}

fn reset_throttling(exchange: &Exchange) {
    let firewall = exchange.context.firewall();
    if let (Some(limiter), Some(keys)) = (firewall.throttling(), &exchange.throttle_keys) {
        if let Err(e) = limiter.reset(keys) {
            tracing::error!(firewall = %firewall.name(), error = %e, "Failed to reset login throttling");
        }
    }
}

fn finish(
    mut exchange: Exchange,
    state: FirewallState,
    response: Option<Response>,
    error: Option<SecurityError>,
) -> DispatchOutcome {
    let token = exchange.token_storage.get_token();
    tracing::debug!(
        firewall = %exchange.firewall_name(),
        state = %state,
        authenticated = token.is_some(),
        "Firewall finished"
    );
    metrics::record_firewall_request(state.as_str());

    DispatchOutcome {
        firewall: Some(exchange.firewall_name().to_string()),
        state,
        response,
        token,
        cookies: exchange.cookies,
        error,
    }
}
