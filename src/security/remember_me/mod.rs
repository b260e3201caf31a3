//! Remember-me: long-lived login cookies independent of the session.
//!
//! # Data Flow
//! ```text
//! successful login with "remember me"
//!     → create_cookie(user) ──► Set-Cookie REMEMBERME=<payload>
//!
//! later request without a session token
//!     → consume_cookie(raw, jar)
//!           ok  ──► user + fresh cookie in jar
//!           err ──► removal cookie in jar, error to caller
//!
//! logout
//!     → clear_cookie(raw, jar) ──► backend record dropped + removal cookie
//! ```
//!
//! # Design Decisions
//! - The strategy is a tagged variant chosen by configuration
//! - Cookie name and attributes are fixed at construction
//! - A rejected cookie is always cleared on the client

pub mod details;
pub mod persistent;
pub mod signature;
pub mod token_provider;

use std::time::{Duration, UNIX_EPOCH};

use crate::http::cookie::{Cookie, CookieJar, SameSite};
use crate::http::request::SecurityRequest;
use crate::security::error::{AuthenticationError, BackendError};
use crate::security::user::User;

pub use details::RememberMeDetails;
pub use persistent::PersistentRememberMe;
pub use signature::SignatureRememberMe;
pub use token_provider::{MemoryTokenProvider, PersistentLoginRecord, TokenProvider};

pub const DEFAULT_COOKIE_NAME: &str = "REMEMBERME";
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(31_536_000);
pub const DEFAULT_PARAMETER: &str = "_remember_me";

/// Cookie attributes and request parameter of a remember-me strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberMeOptions {
    pub name: String,
    pub lifetime: Duration,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    /// Form field that opts in to remember-me.
    pub parameter: String,
    /// Remember every successful login regardless of the form field.
    pub always_remember_me: bool,
}

impl Default for RememberMeOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            lifetime: DEFAULT_LIFETIME,
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: Some(SameSite::Lax),
            parameter: DEFAULT_PARAMETER.to_string(),
            always_remember_me: false,
        }
    }
}

impl RememberMeOptions {
    /// Cookie carrying `details`, expiring at `details.expires`.
    pub(crate) fn cookie(&self, details: &RememberMeDetails) -> Cookie {
        Cookie::new(&self.name, details.to_cookie_value())
            .with_path(&self.path)
            .with_domain(self.domain.clone())
            .with_lifetime(self.lifetime.as_secs(), UNIX_EPOCH + Duration::from_secs(details.expires))
            .with_secure(self.secure)
            .with_http_only(self.http_only)
            .with_same_site(self.same_site)
    }

    pub(crate) fn removal_cookie(&self) -> Cookie {
        Cookie::removal(&self.name)
            .with_path(&self.path)
            .with_domain(self.domain.clone())
            .with_secure(self.secure)
            .with_http_only(self.http_only)
            .with_same_site(self.same_site)
    }
}

/// The configured remember-me strategy.
#[derive(Debug)]
pub enum RememberMeHandler {
    /// Rotating series/token pairs persisted in a `TokenProvider`.
    Persistent(PersistentRememberMe),
    /// Stateless HMAC-signed cookies.
    Signature(SignatureRememberMe),
}

impl RememberMeHandler {
    pub fn options(&self) -> &RememberMeOptions {
        match self {
            Self::Persistent(h) => h.options(),
            Self::Signature(h) => h.options(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.options().name
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            Self::Persistent(_) => "persistent",
            Self::Signature(_) => "signature",
        }
    }

    /// Whether the login request opted in.
    pub fn is_requested(&self, request: &SecurityRequest) -> bool {
        let options = self.options();
        options.always_remember_me
            || matches!(
                request.form_field(&options.parameter),
                Some("true" | "on" | "1" | "yes")
            )
    }

    /// Issue a cookie for `user`.
    pub fn create_cookie(&self, user: &User) -> Result<Cookie, BackendError> {
        match self {
            Self::Persistent(h) => h.create_cookie(user),
            Self::Signature(h) => h.create_cookie(user),
        }
    }

    /// Validate `raw` and return the remembered user.
    ///
    /// On success a fresh cookie is added to `jar`; on any failure a removal
    /// cookie is added instead.
    pub fn consume_cookie(&self, raw: &str, jar: &mut CookieJar) -> Result<User, AuthenticationError> {
        let consumed = match self {
            Self::Persistent(h) => h.consume_cookie(raw),
            Self::Signature(h) => h.consume_cookie(raw),
        };
        match consumed {
            Ok((user, cookie)) => {
                jar.add(cookie);
                Ok(user)
            }
            Err(e) => {
                jar.add(self.options().removal_cookie());
                Err(e)
            }
        }
    }

    /// Forget the presented cookie: drop any backend state and clear it on
    /// the client. The removal cookie is added even if the backend fails.
    pub fn clear_cookie(&self, raw: Option<&str>, jar: &mut CookieJar) -> Result<(), BackendError> {
        jar.add(self.options().removal_cookie());
        match (self, raw) {
            (Self::Persistent(h), Some(raw)) => h.clear(raw),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_cookie_keeps_attributes() {
        let options = RememberMeOptions {
            name: "KEEP".into(),
            path: "/app".into(),
            secure: true,
            ..RememberMeOptions::default()
        };
        let cookie = options.removal_cookie();
        assert_eq!(cookie.name, "KEEP");
        assert_eq!(cookie.path.as_deref(), Some("/app"));
        assert!(cookie.secure);
        assert!(cookie.is_removal());
    }

    #[test]
    fn test_cookie_expiry_matches_payload() {
        let options = RememberMeOptions::default();
        let details = RememberMeDetails::new("app", "alice", 2_000, "v");
        let cookie = options.cookie(&details);
        assert_eq!(cookie.expires, Some(UNIX_EPOCH + Duration::from_secs(2_000)));
        assert_eq!(cookie.max_age, Some(DEFAULT_LIFETIME.as_secs()));
    }
}
