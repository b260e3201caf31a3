//! Form login: `POST <check_path>` with username, password and CSRF fields.

use axum::http::Method;
use axum::response::Response;
use std::sync::Arc;

use crate::http::request::SecurityRequest;
use crate::http::response::redirect;
use crate::security::authenticator::{Authenticator, Passport};
use crate::security::csrf::{CsrfTokenManager, SessionCsrfTokenStore};
use crate::security::error::AuthenticationError;
use crate::security::session::Session;
use crate::security::token::AuthenticationToken;
use crate::security::token_storage::SECURITY_NAMESPACE;
use crate::security::user::{check_credentials, PasswordVerifier, UserProvider};

/// Session key of the last submitted username.
pub const LAST_USERNAME: &str = "last_username";
/// Session key of the last login error (safe message).
pub const LAST_ERROR: &str = "last_error";

/// CSRF token id checked on login.
pub const DEFAULT_CSRF_TOKEN_ID: &str = "authenticate";

const MAX_USERNAME_LENGTH: usize = 4096;

/// Session key of the path to return to after login.
pub fn target_path_key(firewall: &str) -> String {
    format!("target_path.{firewall}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormLoginOptions {
    pub login_path: String,
    pub check_path: String,
    pub default_target_path: String,
    pub always_use_default_target_path: bool,
    pub username_parameter: String,
    pub password_parameter: String,
    pub target_path_parameter: String,
    pub enable_csrf: bool,
    pub csrf_parameter: String,
    pub csrf_token_id: String,
}

impl Default for FormLoginOptions {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            check_path: "/login".to_string(),
            default_target_path: "/".to_string(),
            always_use_default_target_path: false,
            username_parameter: "_username".to_string(),
            password_parameter: "_password".to_string(),
            target_path_parameter: "_target_path".to_string(),
            enable_csrf: false,
            csrf_parameter: "_csrf_token".to_string(),
            csrf_token_id: DEFAULT_CSRF_TOKEN_ID.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct FormLoginAuthenticator {
    firewall: String,
    options: FormLoginOptions,
    users: Arc<dyn UserProvider>,
    verifier: Arc<dyn PasswordVerifier>,
}

impl FormLoginAuthenticator {
    pub fn new(
        firewall: impl Into<String>,
        options: FormLoginOptions,
        users: Arc<dyn UserProvider>,
        verifier: Arc<dyn PasswordVerifier>,
    ) -> Self {
        Self {
            firewall: firewall.into(),
            options,
            users,
            verifier,
        }
    }

    pub fn options(&self) -> &FormLoginOptions {
        &self.options
    }

    fn check_csrf(&self, request: &SecurityRequest, session: Option<&Arc<dyn Session>>) -> Result<(), AuthenticationError> {
        let session = session.ok_or(AuthenticationError::InvalidCsrfToken)?;
        let store = SessionCsrfTokenStore::new(Arc::clone(session), vec![self.options.csrf_token_id.clone()]);
        let submitted = request.form_field(&self.options.csrf_parameter).unwrap_or_default();
        if CsrfTokenManager::new(&store).is_token_valid(&self.options.csrf_token_id, submitted)? {
            Ok(())
        } else {
            Err(AuthenticationError::InvalidCsrfToken)
        }
    }

    /// Where to go after login: a safe submitted target, the saved target,
    /// or the default.
    fn target_path(&self, request: &SecurityRequest, session: Option<&Arc<dyn Session>>) -> String {
        if self.options.always_use_default_target_path {
            return self.options.default_target_path.clone();
        }
        if let Some(target) = request
            .form_field(&self.options.target_path_parameter)
            .filter(|t| is_local_path(t))
        {
            return target.to_string();
        }
        if let Some(session) = session {
            let key = target_path_key(&self.firewall);
            if let Ok(Some(saved)) = session.get(SECURITY_NAMESPACE, &key) {
                if let Err(e) = session.delete(SECURITY_NAMESPACE, &key) {
                    tracing::error!(error = %e, "Failed to clear saved target path");
                }
                if is_local_path(&saved) {
                    return saved;
                }
            }
        }
        self.options.default_target_path.clone()
    }
}

/// Only same-origin absolute paths are accepted as redirect targets.
fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

impl Authenticator for FormLoginAuthenticator {
    fn name(&self) -> &'static str {
        "form_login"
    }

    fn supports(&self, request: &SecurityRequest) -> bool {
        request.method() == Method::POST && request.path() == self.options.check_path
    }

    fn attempted_identifier(&self, request: &SecurityRequest) -> Option<String> {
        request
            .form_field(&self.options.username_parameter)
            .map(|u| u.trim().to_string())
    }

    fn authenticate(
        &self,
        request: &SecurityRequest,
        session: Option<&Arc<dyn Session>>,
    ) -> Result<Passport, AuthenticationError> {
        let username = request
            .form_field(&self.options.username_parameter)
            .map(str::trim)
            .unwrap_or_default();
        let password = request
            .form_field(&self.options.password_parameter)
            .unwrap_or_default();

        if username.is_empty() || username.len() > MAX_USERNAME_LENGTH || password.is_empty() {
            return Err(AuthenticationError::BadCredentials);
        }
        if self.options.enable_csrf {
            self.check_csrf(request, session)?;
        }

        let user = check_credentials(self.users.as_ref(), self.verifier.as_ref(), username, password)?;
        Ok(Passport {
            user,
            remember_me: true,
        })
    }

    fn on_success(
        &self,
        request: &SecurityRequest,
        session: Option<&Arc<dyn Session>>,
        _token: &AuthenticationToken,
    ) -> Option<Response> {
        if let Some(session) = session {
            let cleared = session
                .delete(SECURITY_NAMESPACE, LAST_USERNAME)
                .and_then(|_| session.delete(SECURITY_NAMESPACE, LAST_ERROR));
            if let Err(e) = cleared {
                tracing::error!(error = %e, "Failed to clear login error from session");
            }
        }
        Some(redirect(&self.target_path(request, session)))
    }

    fn on_failure(
        &self,
        request: &SecurityRequest,
        session: Option<&Arc<dyn Session>>,
        error: &AuthenticationError,
    ) -> Option<Response> {
        if let Some(session) = session {
            let username = self.attempted_identifier(request).unwrap_or_default();
            let stored = session
                .set(SECURITY_NAMESPACE, LAST_USERNAME, username)
                .and_then(|_| session.set(SECURITY_NAMESPACE, LAST_ERROR, error.safe_message().to_string()));
            if let Err(e) = stored {
                tracing::error!(error = %e, "Failed to store login error in session");
            }
        }
        Some(redirect(&self.options.login_path))
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn login_path(&self) -> Option<&str> {
        Some(&self.options.login_path)
    }

    fn entry_point(&self, request: &SecurityRequest, session: Option<&Arc<dyn Session>>) -> Response {
        if let Some(session) = session {
            if request.method() == Method::GET && !request.is_xml_http_request() {
                let key = target_path_key(&self.firewall);
                if let Err(e) = session.set(SECURITY_NAMESPACE, &key, request.path_and_query()) {
                    tracing::error!(error = %e, "Failed to save target path");
                }
            }
        }
        redirect(&self.options.login_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::error::BackendError;
    use crate::security::session::MemorySessionStore;
    use crate::security::token::TokenKind;
    use crate::security::user::{InMemoryUserProvider, PlaintextPasswordVerifier, User};
    use axum::http::{header, StatusCode};

    fn authenticator(options: FormLoginOptions) -> FormLoginAuthenticator {
        FormLoginAuthenticator::new(
            "main",
            options,
            Arc::new(InMemoryUserProvider::new([User::new("app", "alice", "wonderland", ["ROLE_USER"])])),
            Arc::new(PlaintextPasswordVerifier),
        )
    }

    fn login(username: &str, password: &str) -> SecurityRequest {
        SecurityRequest::post("/login")
            .with_form("_username", username)
            .with_form("_password", password)
    }

    fn session() -> Arc<dyn Session> {
        MemorySessionStore::new().open(None)
    }

    #[test]
    fn test_supports_post_to_check_path_only() {
        let auth = authenticator(FormLoginOptions::default());
        assert!(auth.supports(&SecurityRequest::post("/login")));
        assert!(!auth.supports(&SecurityRequest::get("/login")));
        assert!(!auth.supports(&SecurityRequest::post("/other")));
    }

    #[test]
    fn test_authenticate() {
        let auth = authenticator(FormLoginOptions::default());
        let passport = auth.authenticate(&login(" alice ", "wonderland"), None).unwrap();
        assert_eq!(passport.user.identifier, "alice");
        assert!(passport.remember_me);

        assert_eq!(
            auth.authenticate(&login("alice", "nope"), None).unwrap_err(),
            AuthenticationError::BadCredentials
        );
        assert_eq!(
            auth.authenticate(&login("", "x"), None).unwrap_err(),
            AuthenticationError::BadCredentials
        );
    }

    #[test]
    fn test_csrf_enforced() {
        let auth = authenticator(FormLoginOptions {
            enable_csrf: true,
            ..FormLoginOptions::default()
        });
        let session = session();
        assert_eq!(
            auth.authenticate(&login("alice", "wonderland"), Some(&session)).unwrap_err(),
            AuthenticationError::InvalidCsrfToken
        );

        let store = SessionCsrfTokenStore::new(session.clone(), vec![]);
        let token = CsrfTokenManager::new(&store).get_token("authenticate").unwrap();
        let request = login("alice", "wonderland").with_form("_csrf_token", token);
        assert!(auth.authenticate(&request, Some(&session)).is_ok());
    }

    #[test]
    fn test_failure_stores_last_username_and_redirects() {
        let auth = authenticator(FormLoginOptions::default());
        let session = session();
        let response = auth
            .on_failure(&login("alice", "nope"), Some(&session), &AuthenticationError::BadCredentials)
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/login");
        assert_eq!(session.get(SECURITY_NAMESPACE, LAST_USERNAME).unwrap().as_deref(), Some("alice"));
        assert_eq!(
            session.get(SECURITY_NAMESPACE, LAST_ERROR).unwrap().as_deref(),
            Some("Invalid credentials.")
        );
    }

    #[test]
    fn test_entry_point_saves_target_for_success_redirect() {
        let auth = authenticator(FormLoginOptions::default());
        let session = session();
        let entry = auth.entry_point(&SecurityRequest::get("/profile"), Some(&session));
        assert_eq!(entry.headers()[header::LOCATION], "/login");

        let user = User::new("app", "alice", "wonderland", ["ROLE_USER"]);
        let token = AuthenticationToken::authenticated(&user, "main", TokenKind::Credentials);
        let success = auth.on_success(&login("alice", "wonderland"), Some(&session), &token).unwrap();
        assert_eq!(success.headers()[header::LOCATION], "/profile");

        // The saved target is used once.
        let again = auth.on_success(&login("alice", "wonderland"), Some(&session), &token).unwrap();
        assert_eq!(again.headers()[header::LOCATION], "/");
    }

    /// A session whose deletes fail.
    #[derive(Debug)]
    struct StuckSession(Arc<dyn Session>);

    impl Session for StuckSession {
        fn id(&self) -> String {
            self.0.id()
        }

        fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, BackendError> {
            self.0.get(namespace, key)
        }

        fn set(&self, namespace: &str, key: &str, value: String) -> Result<(), BackendError> {
            self.0.set(namespace, key, value)
        }

        fn delete(&self, _namespace: &str, _key: &str) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("session store down".into()))
        }

        fn invalidate(&self) -> Result<(), BackendError> {
            self.0.invalidate()
        }

        fn migrate(&self) -> Result<(), BackendError> {
            self.0.migrate()
        }
    }

    #[test]
    fn test_success_redirects_when_session_cleanup_fails() {
        let auth = authenticator(FormLoginOptions::default());
        let session: Arc<dyn Session> = Arc::new(StuckSession(session()));
        auth.entry_point(&SecurityRequest::get("/profile"), Some(&session));

        let user = User::new("app", "alice", "wonderland", ["ROLE_USER"]);
        let token = AuthenticationToken::authenticated(&user, "main", TokenKind::Credentials);
        let response = auth.on_success(&login("alice", "wonderland"), Some(&session), &token).unwrap();
        assert_eq!(response.headers()[header::LOCATION], "/profile");
    }

    #[test]
    fn test_external_target_is_ignored() {
        let auth = authenticator(FormLoginOptions::default());
        let user = User::new("app", "alice", "wonderland", ["ROLE_USER"]);
        let token = AuthenticationToken::authenticated(&user, "main", TokenKind::Credentials);
        let request = login("alice", "wonderland").with_form("_target_path", "//evil.example/");
        let response = auth.on_success(&request, None, &token).unwrap();
        assert_eq!(response.headers()[header::LOCATION], "/");
    }
}
