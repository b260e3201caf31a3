//! HTTP Basic authentication.

use axum::response::Response;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;

use crate::http::request::SecurityRequest;
use crate::http::response::unauthorized;
use crate::security::authenticator::{Authenticator, Passport};
use crate::security::error::AuthenticationError;
use crate::security::session::Session;
use crate::security::token::AuthenticationToken;
use crate::security::user::{check_credentials, PasswordVerifier, UserProvider};

#[derive(Debug)]
pub struct HttpBasicAuthenticator {
    realm: String,
    users: Arc<dyn UserProvider>,
    verifier: Arc<dyn PasswordVerifier>,
}

impl HttpBasicAuthenticator {
    pub fn new(realm: impl Into<String>, users: Arc<dyn UserProvider>, verifier: Arc<dyn PasswordVerifier>) -> Self {
        Self {
            realm: realm.into(),
            users,
            verifier,
        }
    }

    fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm.replace('"', ""))
    }
}

/// Decoded `Authorization: Basic` credentials.
fn basic_credentials(request: &SecurityRequest) -> Option<(String, String)> {
    let header = request.header("authorization")?;
    let (scheme, encoded) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

impl Authenticator for HttpBasicAuthenticator {
    fn name(&self) -> &'static str {
        "http_basic"
    }

    fn supports(&self, request: &SecurityRequest) -> bool {
        request
            .header("authorization")
            .and_then(|h| h.split_once(' '))
            .is_some_and(|(scheme, _)| scheme.eq_ignore_ascii_case("basic"))
    }

    fn attempted_identifier(&self, request: &SecurityRequest) -> Option<String> {
        basic_credentials(request).map(|(user, _)| user)
    }

    fn authenticate(
        &self,
        request: &SecurityRequest,
        _session: Option<&Arc<dyn Session>>,
    ) -> Result<Passport, AuthenticationError> {
        let (user, password) = basic_credentials(request).ok_or(AuthenticationError::BadCredentials)?;
        let user = check_credentials(self.users.as_ref(), self.verifier.as_ref(), &user, &password)?;
        Ok(Passport {
            user,
            remember_me: false,
        })
    }

    fn on_success(
        &self,
        _request: &SecurityRequest,
        _session: Option<&Arc<dyn Session>>,
        _token: &AuthenticationToken,
    ) -> Option<Response> {
        None
    }

    fn on_failure(
        &self,
        _request: &SecurityRequest,
        _session: Option<&Arc<dyn Session>>,
        error: &AuthenticationError,
    ) -> Option<Response> {
        Some(unauthorized(Some(&self.challenge()), error.safe_message()))
    }

    fn is_interactive(&self) -> bool {
        false
    }

    fn entry_point(&self, _request: &SecurityRequest, _session: Option<&Arc<dyn Session>>) -> Response {
        unauthorized(
            Some(&self.challenge()),
            AuthenticationError::InsufficientAuthentication.safe_message(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::user::{InMemoryUserProvider, PlaintextPasswordVerifier, User};
    use axum::http::{header, StatusCode};

    fn authenticator() -> HttpBasicAuthenticator {
        HttpBasicAuthenticator::new(
            "Secured",
            Arc::new(InMemoryUserProvider::new([User::new("app", "alice", "wonderland", ["ROLE_USER"])])),
            Arc::new(PlaintextPasswordVerifier),
        )
    }

    fn basic(user_pass: &str) -> SecurityRequest {
        SecurityRequest::get("/api")
            .with_header("authorization", &format!("Basic {}", STANDARD.encode(user_pass)))
    }

    #[test]
    fn test_valid_credentials() {
        let auth = authenticator();
        let request = basic("alice:wonderland");
        assert!(auth.supports(&request));
        assert_eq!(auth.attempted_identifier(&request).as_deref(), Some("alice"));
        assert_eq!(auth.authenticate(&request, None).unwrap().user.identifier, "alice");
    }

    #[test]
    fn test_password_may_contain_colon() {
        let auth = HttpBasicAuthenticator::new(
            "Secured",
            Arc::new(InMemoryUserProvider::new([User::new("app", "bob", "a:b", Vec::<String>::new())])),
            Arc::new(PlaintextPasswordVerifier),
        );
        assert!(auth.authenticate(&basic("bob:a:b"), None).is_ok());
    }

    #[test]
    fn test_other_schemes_not_supported() {
        let auth = authenticator();
        let bearer = SecurityRequest::get("/api").with_header("authorization", "Bearer abc");
        assert!(!auth.supports(&bearer));
        assert!(!auth.supports(&SecurityRequest::get("/api")));
    }

    #[test]
    fn test_failure_challenges() {
        let auth = authenticator();
        let response = auth
            .on_failure(&basic("alice:nope"), None, &AuthenticationError::BadCredentials)
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic realm=\"Secured\"");
    }
}
