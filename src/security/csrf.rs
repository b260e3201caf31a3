//! CSRF token generation and validation.

use std::fmt::Debug;
use std::sync::Arc;

use crate::security::crypto::{constant_time_str_eq, random_token};
use crate::security::error::BackendError;
use crate::security::session::Session;

const CSRF_NAMESPACE: &str = "_csrf";

/// Storage for CSRF tokens, keyed by token id (intention).
pub trait CsrfTokenStore: Send + Sync + Debug {
    fn get(&self, token_id: &str) -> Result<Option<String>, BackendError>;

    fn set(&self, token_id: &str, value: String) -> Result<(), BackendError>;

    fn remove(&self, token_id: &str) -> Result<(), BackendError>;

    /// Drop every token.
    fn clear(&self) -> Result<(), BackendError>;
}

/// Keeps CSRF tokens in the client session.
#[derive(Debug)]
pub struct SessionCsrfTokenStore {
    session: Arc<dyn Session>,
    token_ids: Vec<String>,
}

impl SessionCsrfTokenStore {
    /// `token_ids` are the ids `clear` drops.
    pub fn new(session: Arc<dyn Session>, token_ids: Vec<String>) -> Self {
        Self { session, token_ids }
    }
}

impl CsrfTokenStore for SessionCsrfTokenStore {
    fn get(&self, token_id: &str) -> Result<Option<String>, BackendError> {
        self.session.get(CSRF_NAMESPACE, token_id)
    }

    fn set(&self, token_id: &str, value: String) -> Result<(), BackendError> {
        self.session.set(CSRF_NAMESPACE, token_id, value)
    }

    fn remove(&self, token_id: &str) -> Result<(), BackendError> {
        self.session.delete(CSRF_NAMESPACE, token_id)
    }

    fn clear(&self) -> Result<(), BackendError> {
        for id in &self.token_ids {
            self.session.delete(CSRF_NAMESPACE, id)?;
        }
        Ok(())
    }
}

/// Issues and checks CSRF tokens.
#[derive(Debug)]
pub struct CsrfTokenManager<'a> {
    store: &'a dyn CsrfTokenStore,
}

impl<'a> CsrfTokenManager<'a> {
    pub fn new(store: &'a dyn CsrfTokenStore) -> Self {
        Self { store }
    }

    /// The current token for `token_id`, generating one if absent.
    pub fn get_token(&self, token_id: &str) -> Result<String, BackendError> {
        if let Some(existing) = self.store.get(token_id)? {
            return Ok(existing);
        }
        let token = random_token();
        self.store.set(token_id, token.clone())?;
        Ok(token)
    }

    /// Replace the token for `token_id`.
    pub fn refresh_token(&self, token_id: &str) -> Result<String, BackendError> {
        let token = random_token();
        self.store.set(token_id, token.clone())?;
        Ok(token)
    }

    /// Constant-time check of a submitted token. Missing tokens never match.
    pub fn is_token_valid(&self, token_id: &str, submitted: &str) -> Result<bool, BackendError> {
        Ok(match self.store.get(token_id)? {
            Some(expected) => !submitted.is_empty() && constant_time_str_eq(&expected, submitted),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::session::MemorySessionStore;

    fn store() -> SessionCsrfTokenStore {
        let session = MemorySessionStore::new().open(None);
        SessionCsrfTokenStore::new(session, vec!["authenticate".to_string()])
    }

    #[test]
    fn test_token_is_stable_until_refreshed() {
        let store = store();
        let manager = CsrfTokenManager::new(&store);
        let first = manager.get_token("authenticate").unwrap();
        assert_eq!(manager.get_token("authenticate").unwrap(), first);
        assert!(manager.is_token_valid("authenticate", &first).unwrap());

        let refreshed = manager.refresh_token("authenticate").unwrap();
        assert_ne!(refreshed, first);
        assert!(!manager.is_token_valid("authenticate", &first).unwrap());
    }

    #[test]
    fn test_missing_or_empty_token_is_invalid() {
        let store = store();
        let manager = CsrfTokenManager::new(&store);
        assert!(!manager.is_token_valid("authenticate", "").unwrap());
        assert!(!manager.is_token_valid("authenticate", "anything").unwrap());
    }

    #[test]
    fn test_clear_drops_tokens() {
        let store = store();
        let manager = CsrfTokenManager::new(&store);
        manager.get_token("authenticate").unwrap();
        store.clear().unwrap();
        assert_eq!(store.get("authenticate").unwrap(), None);
    }
}
