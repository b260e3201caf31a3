//! Authentication tokens.
//!
//! # Design Decisions
//! - Tokens are immutable: re-authentication replaces the token wholesale
//! - Session storage goes through a versioned envelope; anything that does not
//!   decode to a known shape is treated as "not authenticated"

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::security::user::User;

/// How a token was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Interactive credentials (form login, HTTP basic).
    Credentials,
    /// Restored from a remember-me cookie.
    RememberMe,
}

/// Reference to a user: class plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    pub class: String,
    pub identifier: String,
}

impl UserIdentity {
    pub fn new(class: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            identifier: identifier.into(),
        }
    }
}

/// The authenticated identity of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationToken {
    user: UserIdentity,
    roles: BTreeSet<String>,
    authenticated: bool,
    firewall: String,
    kind: TokenKind,
}

impl AuthenticationToken {
    /// An authenticated token for `user` on `firewall`.
    pub fn authenticated(user: &User, firewall: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            user: UserIdentity::new(user.class.clone(), user.identifier.clone()),
            roles: user.roles.iter().cloned().collect(),
            authenticated: true,
            firewall: firewall.into(),
            kind,
        }
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    pub fn identifier(&self) -> &str {
        &self.user.identifier
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn firewall(&self) -> &str {
        &self.firewall
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn is_remembered(&self) -> bool {
        self.authenticated && self.kind == TokenKind::RememberMe
    }

    pub fn is_fully_authenticated(&self) -> bool {
        self.authenticated && self.kind == TokenKind::Credentials
    }
}

/// Versioned storage envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "lowercase")]
enum StoredToken {
    V1 { token: AuthenticationToken },
}

/// Serialize a token for the session.
pub fn encode_for_storage(token: &AuthenticationToken) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StoredToken::V1 {
        token: token.clone(),
    })
}

/// Decode a stored token. `None` for anything that is not a well-formed,
/// authenticated token.
pub fn decode_from_storage(raw: &str) -> Option<AuthenticationToken> {
    match serde_json::from_str::<StoredToken>(raw) {
        Ok(StoredToken::V1 { token })
            if token.authenticated && !token.user.identifier.is_empty() =>
        {
            Some(token)
        }
        Ok(_) => {
            tracing::debug!("Discarding stored token with invalid shape");
            None
        }
        Err(e) => {
            tracing::debug!(error = %e, "Discarding undecodable stored token");
            None
        }
    }
}

/// The token seen by application handlers, installed as a request extension.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    pub token: Option<AuthenticationToken>,
}

impl SecurityContext {
    pub fn identifier(&self) -> Option<&str> {
        self.token.as_ref().map(AuthenticationToken::identifier)
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.as_ref().is_some_and(AuthenticationToken::is_authenticated)
    }
}
