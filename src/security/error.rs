//! Security error taxonomy.
//!
//! # Layers
//! ```text
//! BackendError          collaborator failure (storage, verifier)
//!     → AuthenticationError::Backend   (fail closed)
//! AuthenticationError   bad/missing/expired credentials, cookie theft
//! AccessDeniedError     authorization failure for a known request
//!     → SecurityError   what the firewall exception boundary handles
//! ConfigurationError    setup time only, fatal
//! FirewallError         everything the boundary does not handle
//! ```
//!
//! # Design Decisions
//! - `UserNotFound` never reaches a response: `normalized()` folds it into
//!   `BadCredentials` and responses only ever use `safe_message()`
//! - Backend failures are authentication failures, never a pass

use std::time::Duration;
use thiserror::Error;

/// Failure of an external collaborator (session store, token backend,
/// rate-limit store, password verifier).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
}

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    #[error("invalid credentials")]
    BadCredentials,

    /// Internal only. Normalized to `BadCredentials` before any response.
    #[error("user \"{0}\" not found")]
    UserNotFound(String),

    #[error("account is disabled")]
    AccountDisabled,

    /// A known remember-me series was presented with a stale value.
    #[error("remember-me cookie theft detected")]
    CookieTheft,

    #[error("malformed remember-me cookie: {0}")]
    InvalidCookie(&'static str),

    #[error("no persistent login found for the presented series")]
    TokenNotFound,

    #[error("remember-me cookie has expired")]
    CookieExpired,

    #[error("invalid CSRF token")]
    InvalidCsrfToken,

    #[error("too many failed login attempts, retry in {} seconds", retry_after.as_secs())]
    TooManyAttempts { retry_after: Duration },

    #[error("full authentication is required")]
    InsufficientAuthentication,

    #[error("authentication backend failure: {0}")]
    Backend(#[from] BackendError),
}

impl AuthenticationError {
    /// Fold errors that would disclose account existence into a generic one.
    pub fn normalized(self) -> Self {
        match self {
            Self::UserNotFound(_) => Self::BadCredentials,
            other => other,
        }
    }

    pub fn is_cookie_theft(&self) -> bool {
        matches!(self, Self::CookieTheft)
    }

    /// Message safe to show to the client.
    pub fn safe_message(&self) -> &'static str {
        match self {
            Self::BadCredentials | Self::UserNotFound(_) => "Invalid credentials.",
            Self::AccountDisabled => "Account is disabled.",
            Self::CookieTheft
            | Self::InvalidCookie(_)
            | Self::TokenNotFound
            | Self::CookieExpired
            | Self::InsufficientAuthentication => {
                "Full authentication is required to access this resource."
            }
            Self::InvalidCsrfToken => "Invalid CSRF token.",
            Self::TooManyAttempts { .. } => {
                "Too many failed login attempts, please try again later."
            }
            Self::Backend(_) => {
                "Authentication request could not be processed due to a system problem."
            }
        }
    }
}

/// Authorization failure: the token does not satisfy the rule's attributes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("access denied to {subject} (requires {})", attributes.join(", "))]
pub struct AccessDeniedError {
    pub attributes: Vec<String>,
    pub subject: String,
}

impl AccessDeniedError {
    pub fn new(attributes: &[String], subject: impl Into<String>) -> Self {
        Self {
            attributes: attributes.to_vec(),
            subject: subject.into(),
        }
    }
}

/// Errors converted into responses by the firewall exception boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    AccessDenied(#[from] AccessDeniedError),
}

impl SecurityError {
    pub fn is_cookie_theft(&self) -> bool {
        matches!(self, Self::Authentication(e) if e.is_cookie_theft())
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}

/// Setup-time errors. Never raised per request.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("invalid request pattern \"{pattern}\": {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown channel \"{0}\" (expected http or https)")]
    InvalidChannel(String),

    #[error("duplicate firewall name \"{0}\"")]
    DuplicateFirewall(String),

    #[error("firewall \"{firewall}\": {message}")]
    Firewall { firewall: String, message: String },
}

/// Failures the exception boundary does not handle.
#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),

    #[error("firewall worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
