//! Authenticators: strategies that turn request credentials into a user.
//!
//! # Data Flow
//! ```text
//! supports(request)? ──no──► next authenticator
//!     │yes
//!     ▼
//! authenticate(request, session) ──ok──► Passport ──► token installed
//!     │err                                   └─► on_success(...) response?
//!     ▼
//! on_failure(...) response?  (or the firewall entry point)
//! ```
//!
//! # Design Decisions
//! - Authenticators never touch token storage; the firewall listener owns it
//! - Provider errors are normalized before anything reaches a response

pub mod form_login;
pub mod http_basic;

use axum::response::Response;
use std::fmt::Debug;
use std::sync::Arc;

use crate::http::request::SecurityRequest;
use crate::security::error::AuthenticationError;
use crate::security::session::Session;
use crate::security::token::{AuthenticationToken, TokenKind};
use crate::security::user::User;

pub use form_login::{FormLoginAuthenticator, FormLoginOptions};
pub use http_basic::HttpBasicAuthenticator;

/// Result of a successful `authenticate`.
#[derive(Debug, Clone)]
pub struct Passport {
    pub user: User,
    /// The authenticator allows remember-me on this login.
    pub remember_me: bool,
}

pub trait Authenticator: Send + Sync + Debug {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Whether this request carries credentials for this authenticator.
    fn supports(&self, request: &SecurityRequest) -> bool;

    /// The submitted identifier, before verification. Used for throttling.
    fn attempted_identifier(&self, request: &SecurityRequest) -> Option<String>;

    fn authenticate(
        &self,
        request: &SecurityRequest,
        session: Option<&Arc<dyn Session>>,
    ) -> Result<Passport, AuthenticationError>;

    /// Response after a successful login, or `None` to continue to the handler.
    fn on_success(
        &self,
        request: &SecurityRequest,
        session: Option<&Arc<dyn Session>>,
        token: &AuthenticationToken,
    ) -> Option<Response>;

    /// Response after a failed login, or `None` to use the entry point.
    fn on_failure(
        &self,
        request: &SecurityRequest,
        session: Option<&Arc<dyn Session>>,
        error: &AuthenticationError,
    ) -> Option<Response>;

    /// Interactive logins migrate the session after success.
    fn is_interactive(&self) -> bool;

    fn token_kind(&self) -> TokenKind {
        TokenKind::Credentials
    }

    /// Path of the login page, for authenticators that have one.
    fn login_path(&self) -> Option<&str> {
        None
    }

    /// Response that asks an unauthenticated client to log in.
    fn entry_point(&self, request: &SecurityRequest, session: Option<&Arc<dyn Session>>) -> Response;
}
