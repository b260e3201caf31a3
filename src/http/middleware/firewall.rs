//! Firewall middleware.
//! Runs the security pipeline in front of every handler.
//!
//! # Data Flow
//! ```text
//! Request<Body>
//!     → buffer body (size-limited), build SecurityRequest
//!     → open session from the session cookie
//!     → dispatcher.dispatch on the blocking pool
//!          terminal response ──► send it
//!          otherwise        ──► handler runs with SecurityContext + SessionHandle
//!     → Set-Cookie: firewall cookies + session cookie when the id changed
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::config::schema::SessionConfig;
use crate::http::cookie::{Cookie, CookieJar};
use crate::http::request::SecurityRequest;
use crate::http::response::error_response;
use crate::http::server::AppState;
use crate::security::error::FirewallError;
use crate::security::firewall::DispatchOutcome;
use crate::security::session::{MemorySessionStore, Session};
use crate::security::token::SecurityContext;

/// The request's session, available to handlers as an extension.
#[derive(Clone, Debug)]
pub struct SessionHandle(pub Arc<dyn Session>);

pub async fn firewall_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let inner = state.inner.load_full();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, inner.config.listener.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let error = FirewallError::from(e);
            tracing::warn!(error = %error, "Rejecting request body");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", "Request body too large");
        }
    };

    let security_request = SecurityRequest::from_parts(&parts, &bytes, client_ip);
    let session_config = &inner.config.session;
    let presented_id = security_request
        .cookie(&session_config.cookie_name)
        .map(str::to_owned);
    let session: Arc<dyn Session> = state.sessions.open(presented_id.as_deref());

    let dispatcher = inner.dispatcher.clone();
    let worker_session = Arc::clone(&session);
    let outcome = match tokio::task::spawn_blocking(move || {
        dispatcher.dispatch(security_request, Some(worker_session))
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            let error = FirewallError::from(e);
            tracing::error!(error = %error, "Firewall did not complete");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred",
            );
        }
    };

    let DispatchOutcome {
        response,
        token,
        mut cookies,
        ..
    } = outcome;

    let mut response = match response {
        Some(response) => response,
        None => {
            let mut request = Request::from_parts(parts, Body::from(bytes));
            request.extensions_mut().insert(SecurityContext { token });
            request.extensions_mut().insert(SessionHandle(Arc::clone(&session)));
            next.run(request).await
        }
    };

    if let Some(cookie) = session_cookie(session_config, &state.sessions, presented_id.as_deref(), &session.id()) {
        cookies.add(cookie);
    }
    apply_cookies(&cookies, &mut response);
    response
}

fn apply_cookies(cookies: &CookieJar, response: &mut Response) {
    if !cookies.is_empty() {
        cookies.apply(response.headers_mut());
    }
}

/// Cookie to send when the session id the client holds is stale.
fn session_cookie(
    config: &SessionConfig,
    sessions: &MemorySessionStore,
    presented: Option<&str>,
    current: &str,
) -> Option<Cookie> {
    if presented == Some(current) {
        return None;
    }
    let base = if sessions.contains(current) {
        Cookie::new(&config.cookie_name, current)
    } else if presented.is_some() {
        Cookie::removal(&config.cookie_name)
    } else {
        return None;
    };
    Some(
        base.with_path(&config.cookie_path)
            .with_secure(config.cookie_secure)
            .with_http_only(true)
            .with_same_site(Some(config.cookie_same_site)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_only_when_id_changes() {
        let config = SessionConfig::default();
        let sessions = MemorySessionStore::new();
        let session = sessions.open(None);
        let id = session.id();

        // Nothing stored yet: no cookie for a brand new session.
        assert!(session_cookie(&config, &sessions, None, &id).is_none());

        session.set("ns", "k", "v".into()).unwrap();
        let cookie = session_cookie(&config, &sessions, None, &id).unwrap();
        assert_eq!(cookie.name, "GATEHOUSE_SESSION");
        assert_eq!(cookie.value, id);

        assert!(session_cookie(&config, &sessions, Some(&id), &id).is_none());
    }

    #[test]
    fn test_stale_session_cookie_is_removed() {
        let config = SessionConfig::default();
        let sessions = MemorySessionStore::new();
        let session = sessions.open(Some("forged"));
        let cookie = session_cookie(&config, &sessions, Some("forged"), &session.id()).unwrap();
        assert!(cookie.is_removal());
    }
}
