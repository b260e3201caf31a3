//! Firewall listeners.
//!
//! Each listener inspects the exchange and answers with a [`ListenerOutcome`]:
//! keep going, stop with a response, or stop with an error for the
//! exception boundary. Listeners never panic their way out and never throw
//! to short-circuit.

use axum::http::StatusCode;
use axum::response::Response;
use std::sync::Arc;

use crate::http::response::{error_response, redirect};
use crate::observability::metrics;
use crate::security::csrf::{CsrfTokenStore, SessionCsrfTokenStore};
use crate::security::error::{AccessDeniedError, AuthenticationError, SecurityError};
use crate::security::firewall::Exchange;
use crate::security::logout::LogoutSubject;
use crate::security::token::{AuthenticationToken, TokenKind};

/// What a listener decided.
#[derive(Debug)]
pub enum ListenerOutcome {
    Continue,
    Respond(Response),
    Fail(SecurityError),
}

impl ListenerOutcome {
    fn fail(error: impl Into<SecurityError>) -> Self {
        ListenerOutcome::Fail(error.into())
    }
}

/// The listeners a firewall can run, in their fixed relative order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    /// Redirect to the scheme the access rule requires.
    Channel,
    /// Charge login attempts against the rate limiter.
    LoginThrottling,
    /// Run the first authenticator that supports the request.
    Authenticators,
    /// Log in from the remember-me cookie when no token is present.
    RememberMe,
    /// Vote on the access rule.
    Access,
    /// Perform logout on the logout path.
    Logout,
}

impl Listener {
    pub fn name(&self) -> &'static str {
        match self {
            Listener::Channel => "channel",
            Listener::LoginThrottling => "login_throttling",
            Listener::Authenticators => "authenticators",
            Listener::RememberMe => "remember_me",
            Listener::Access => "access",
            Listener::Logout => "logout",
        }
    }

    pub fn handle(self, exchange: &mut Exchange) -> ListenerOutcome {
        match self {
            Listener::Channel => channel(exchange),
            Listener::LoginThrottling => login_throttling(exchange),
            Listener::Authenticators => authenticate(exchange),
            Listener::RememberMe => remember_me(exchange),
            Listener::Access => access(exchange),
            Listener::Logout => logout(exchange),
        }
    }
}

fn channel(exchange: &mut Exchange) -> ListenerOutcome {
    let Some(required) = exchange.context.rule().and_then(|r| r.channel()) else {
        return ListenerOutcome::Continue;
    };
    if exchange.request.channel() == required {
        return ListenerOutcome::Continue;
    }

    match exchange.request.url_on(required) {
        Some(url) => {
            tracing::debug!(channel = required.scheme(), "Redirecting to required channel");
            ListenerOutcome::Respond(redirect(&url))
        }
        None => ListenerOutcome::Respond(error_response(
            StatusCode::BAD_REQUEST,
            "channel_required",
            format!("This resource must be requested over {}", required.scheme()),
        )),
    }
}

fn login_throttling(exchange: &mut Exchange) -> ListenerOutcome {
    let firewall = Arc::clone(exchange.context.firewall());
    let Some(limiter) = firewall.throttling() else {
        return ListenerOutcome::Continue;
    };
    let Some(authenticator) = exchange.context.supporting_authenticator(&exchange.request) else {
        return ListenerOutcome::Continue;
    };

    let identifier = authenticator.attempted_identifier(&exchange.request);
    let keys = limiter.keys(
        exchange.request.client_ip(),
        identifier.as_deref().map(str::as_bytes),
    );

    match limiter.consume(&keys) {
        Ok(limit) if limit.accepted => {
            exchange.throttle_keys = Some(keys);
            ListenerOutcome::Continue
        }
        Ok(limit) => {
            tracing::warn!(
                firewall = %firewall.name(),
                client_ip = %exchange.request.client_ip(),
                retry_after_secs = limit.retry_after.as_secs(),
                security_event = "login_throttled",
                "Too many login attempts"
            );
            metrics::record_login_throttled(firewall.name());
            ListenerOutcome::fail(AuthenticationError::TooManyAttempts {
                retry_after: limit.retry_after,
            })
        }
        Err(e) => {
            tracing::error!(firewall = %firewall.name(), error = %e, "Rate limiter unavailable");
            ListenerOutcome::fail(AuthenticationError::Backend(e))
        }
    }
}

fn authenticate(exchange: &mut Exchange) -> ListenerOutcome {
    let firewall = Arc::clone(exchange.context.firewall());
    let Some(authenticator) = exchange
        .context
        .supporting_authenticator(&exchange.request)
        .cloned()
    else {
        return ListenerOutcome::Continue;
    };

    let passport = match authenticator.authenticate(&exchange.request, exchange.session.as_ref()) {
        Ok(passport) => passport,
        Err(e) => {
            let error = e.normalized();
            tracing::warn!(
                firewall = %firewall.name(),
                authenticator = authenticator.name(),
                error = %error,
                "Authentication failed"
            );
            metrics::record_authentication(firewall.name(), authenticator.name(), "failure");
            if let Err(e) = exchange.token_storage.reset() {
                tracing::error!(error = %e, "Failed to clear token after failed login");
            }
            return match authenticator.on_failure(&exchange.request, exchange.session.as_ref(), &error) {
                Some(response) => ListenerOutcome::Respond(response),
                None => ListenerOutcome::fail(error),
            };
        }
    };

    let token = AuthenticationToken::authenticated(&passport.user, firewall.name(), authenticator.token_kind());

    if authenticator.is_interactive() {
        if let Some(session) = &exchange.session {
            if let Err(e) = session.migrate() {
                tracing::error!(error = %e, "Failed to migrate session after login");
                return ListenerOutcome::fail(AuthenticationError::Backend(e));
            }
        }
    }
    if let Err(e) = exchange.token_storage.set_token(Some(token.clone())) {
        tracing::error!(error = %e, "Failed to store authentication token");
        return ListenerOutcome::fail(AuthenticationError::Backend(e));
    }
    exchange.authenticated_now = true;

    if let Some(remember_me) = firewall.remember_me() {
        if passport.remember_me && remember_me.is_requested(&exchange.request) {
            match remember_me.create_cookie(&passport.user) {
                Ok(cookie) => exchange.cookies.add(cookie),
                Err(e) => tracing::error!(error = %e, "Failed to issue remember-me cookie"),
            }
        }
    }

    tracing::info!(
        firewall = %firewall.name(),
        authenticator = authenticator.name(),
        user = %token.identifier(),
        "Authentication succeeded"
    );
    metrics::record_authentication(firewall.name(), authenticator.name(), "success");

    exchange.deferred_response =
        authenticator.on_success(&exchange.request, exchange.session.as_ref(), &token);
    ListenerOutcome::Continue
}

fn remember_me(exchange: &mut Exchange) -> ListenerOutcome {
    let firewall = Arc::clone(exchange.context.firewall());
    let Some(handler) = firewall.remember_me() else {
        return ListenerOutcome::Continue;
    };
    if exchange.token_storage.get_token().is_some() {
        return ListenerOutcome::Continue;
    }
    let Some(raw) = exchange.request.cookie(handler.cookie_name()).map(str::to_owned) else {
        return ListenerOutcome::Continue;
    };

    match handler.consume_cookie(&raw, &mut exchange.cookies) {
        Ok(user) => {
            let token = AuthenticationToken::authenticated(&user, firewall.name(), TokenKind::RememberMe);
            if let Err(e) = exchange.token_storage.set_token(Some(token)) {
                tracing::error!(error = %e, "Failed to store remember-me token");
                return ListenerOutcome::fail(AuthenticationError::Backend(e));
            }
            tracing::info!(
                firewall = %firewall.name(),
                strategy = handler.strategy(),
                user = %user.identifier,
                "Remember-me login succeeded"
            );
            metrics::record_remember_me(firewall.name(), "success");
            ListenerOutcome::Continue
        }
        Err(e) if e.is_cookie_theft() => {
            metrics::record_remember_me(firewall.name(), "theft");
            ListenerOutcome::fail(e)
        }
        Err(e) => {
            tracing::info!(firewall = %firewall.name(), reason = %e, "Remember-me cookie rejected");
            metrics::record_remember_me(firewall.name(), "rejected");
            ListenerOutcome::Continue
        }
    }
}

fn access(exchange: &mut Exchange) -> ListenerOutcome {
    let Some(rule) = exchange.context.rule().cloned() else {
        return ListenerOutcome::Continue;
    };
    let token = exchange.token_storage.get_token();
    let subject = exchange.request.path();

    if exchange.context.decision().decide(token.as_ref(), rule.attributes(), subject) {
        return ListenerOutcome::Continue;
    }

    tracing::debug!(
        firewall = %exchange.firewall_name(),
        path = %subject,
        user = token.as_ref().map(|t| t.identifier()).unwrap_or("anonymous"),
        "Access denied"
    );
    metrics::record_access_denied(exchange.firewall_name());
    ListenerOutcome::fail(AccessDeniedError::new(rule.attributes(), subject))
}

fn logout(exchange: &mut Exchange) -> ListenerOutcome {
    let firewall = Arc::clone(exchange.context.firewall());
    let Some(logout) = firewall.logout() else {
        return ListenerOutcome::Continue;
    };

    let csrf = exchange
        .session
        .as_ref()
        .filter(|_| !firewall.csrf_token_ids().is_empty())
        .map(|s| SessionCsrfTokenStore::new(Arc::clone(s), firewall.csrf_token_ids().to_vec()));
    let remember_me_cookie = firewall
        .remember_me()
        .and_then(|rm| exchange.request.cookie(rm.cookie_name()));
    let user = exchange
        .token_storage
        .get_token()
        .map(|t| t.identifier().to_string());

    let report = logout.perform(LogoutSubject {
        token_storage: &mut exchange.token_storage,
        session: exchange.session.as_ref(),
        csrf: csrf.as_ref().map(|c| c as &dyn CsrfTokenStore),
        remember_me_cookie,
        cookies: &mut exchange.cookies,
    });

    tracing::info!(
        firewall = %firewall.name(),
        user = user.as_deref().unwrap_or("anonymous"),
        completed = report.completed.len(),
        failed = report.failed.len(),
        "Logged out"
    );
    ListenerOutcome::Respond(redirect(logout.target()))
}
