//! Per-request holder of the current authentication token.
//!
//! # Data Flow
//! ```text
//! get_token() ── cached? ──yes──► cached value
//!                   │no
//!                   ▼
//!           session "_security"/<firewall> ──decode──► cache ──► value
//!
//! set_token(t) ──► session write ──ok──► cache = t
//! ```
//!
//! # Design Decisions
//! - The first read is memoized for the whole request; a concurrent write to
//!   the shared session by another request is not observed
//! - A storage instance lives exactly as long as one request
//! - Stateless firewalls have no session: the token lives in the cache only

use std::sync::Arc;

use crate::security::error::BackendError;
use crate::security::session::Session;
use crate::security::token::{decode_from_storage, encode_for_storage, AuthenticationToken};

/// Session namespace for security state.
pub const SECURITY_NAMESPACE: &str = "_security";

#[derive(Debug)]
pub struct TokenStorage {
    firewall: String,
    session: Option<Arc<dyn Session>>,
    cache: Option<Option<AuthenticationToken>>,
}

impl TokenStorage {
    /// Storage for `firewall`, backed by `session` when the firewall is stateful.
    pub fn new(firewall: impl Into<String>, session: Option<Arc<dyn Session>>) -> Self {
        Self {
            firewall: firewall.into(),
            session,
            cache: None,
        }
    }

    /// Current token. Backend read errors yield `None`.
    pub fn get_token(&mut self) -> Option<AuthenticationToken> {
        if let Some(cached) = &self.cache {
            return cached.clone();
        }
        let loaded = self.load();
        self.cache = Some(loaded.clone());
        loaded
    }

    /// Replace the current token.
    ///
    /// Clearing always clears the request view, even if the session write fails.
    pub fn set_token(&mut self, token: Option<AuthenticationToken>) -> Result<(), BackendError> {
        let written = self.write(token.as_ref());
        if written.is_ok() || token.is_none() {
            self.cache = Some(token);
        }
        written
    }

    /// Clear the token.
    pub fn reset(&mut self) -> Result<(), BackendError> {
        self.set_token(None)
    }

    pub fn firewall(&self) -> &str {
        &self.firewall
    }

    fn load(&self) -> Option<AuthenticationToken> {
        let session = self.session.as_ref()?;
        let raw = match session.get(SECURITY_NAMESPACE, &self.firewall) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::error!(firewall = %self.firewall, error = %e, "Failed to read token from session");
                return None;
            }
        };
        decode_from_storage(&raw).filter(|token| token.firewall() == self.firewall)
    }

    fn write(&self, token: Option<&AuthenticationToken>) -> Result<(), BackendError> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        match token {
            Some(token) => {
                let raw = encode_for_storage(token).map_err(|e| BackendError::Corrupt(e.to_string()))?;
                session.set(SECURITY_NAMESPACE, &self.firewall, raw)
            }
            None => session.delete(SECURITY_NAMESPACE, &self.firewall),
        }
    }
}
