//! Users, user lookup and password verification.
//!
//! # Design Decisions
//! - Lookup of an unknown identifier and a wrong password are indistinguishable
//!   to the caller: `check_credentials` verifies against a dummy hash for
//!   unknown users so both paths cost one verification
//! - Disabled accounts are only reported after the password verified

use dashmap::DashMap;
use std::fmt::Debug;
use thiserror::Error;

use crate::security::crypto::constant_time_str_eq;
use crate::security::error::{AuthenticationError, BackendError};

/// A user known to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub class: String,
    pub identifier: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub enabled: bool,
}

/// Class of users served by [`InMemoryUserProvider`].
pub const DEFAULT_USER_CLASS: &str = "app";

impl User {
    pub fn new<R, S>(
        class: impl Into<String>,
        identifier: impl Into<String>,
        password_hash: impl Into<String>,
        roles: R,
    ) -> Self
    where
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            class: class.into(),
            identifier: identifier.into(),
            password_hash: password_hash.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserProviderError {
    #[error("user \"{0}\" not found")]
    NotFound(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<UserProviderError> for AuthenticationError {
    fn from(e: UserProviderError) -> Self {
        match e {
            UserProviderError::NotFound(id) => AuthenticationError::UserNotFound(id),
            UserProviderError::Backend(e) => AuthenticationError::Backend(e),
        }
    }
}

/// User lookup contract.
pub trait UserProvider: Send + Sync + Debug {
    fn load_user_by_identifier(&self, identifier: &str) -> Result<User, UserProviderError>;

    /// Whether users of this class come from this provider.
    fn supports_class(&self, class: &str) -> bool;
}

/// Provider over a fixed set of users. Identifiers are case-insensitive.
#[derive(Debug, Default)]
pub struct InMemoryUserProvider {
    class: String,
    users: DashMap<String, User>,
}

impl InMemoryUserProvider {
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        let provider = Self {
            class: DEFAULT_USER_CLASS.to_string(),
            users: DashMap::new(),
        };
        for user in users {
            provider.insert(user);
        }
        provider
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.identifier.to_lowercase(), user);
    }

    /// Replace the stored password hash of an existing user.
    pub fn update_password(&self, identifier: &str, password_hash: impl Into<String>) -> bool {
        match self.users.get_mut(&identifier.to_lowercase()) {
            Some(mut user) => {
                user.password_hash = password_hash.into();
                true
            }
            None => false,
        }
    }
}

impl UserProvider for InMemoryUserProvider {
    fn load_user_by_identifier(&self, identifier: &str) -> Result<User, UserProviderError> {
        self.users
            .get(&identifier.to_lowercase())
            .map(|u| u.value().clone())
            .ok_or_else(|| UserProviderError::NotFound(identifier.to_string()))
    }

    fn supports_class(&self, class: &str) -> bool {
        self.class == class
    }
}

/// Password/secret verification contract. Hash design lives behind it.
pub trait PasswordVerifier: Send + Sync + Debug {
    fn verify(&self, stored_hash: &str, supplied: &str) -> Result<bool, BackendError>;
}

/// Compares the stored value with the supplied one in constant time.
/// For development and tests only.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextPasswordVerifier;

impl PasswordVerifier for PlaintextPasswordVerifier {
    fn verify(&self, stored_hash: &str, supplied: &str) -> Result<bool, BackendError> {
        Ok(constant_time_str_eq(stored_hash, supplied))
    }
}

const DUMMY_HASH: &str = "$dummy$0000000000000000000000000000000000000000000000000000000000000000";

/// Load the user and verify the password.
///
/// Every failure mode is reported as `BadCredentials` (after normalization)
/// except backend failures and disabled accounts with a correct password.
pub fn check_credentials(
    users: &dyn UserProvider,
    verifier: &dyn PasswordVerifier,
    identifier: &str,
    password: &str,
) -> Result<User, AuthenticationError> {
    if identifier.is_empty() {
        return Err(AuthenticationError::BadCredentials);
    }

    let user = match users.load_user_by_identifier(identifier) {
        Ok(user) => user,
        Err(UserProviderError::NotFound(id)) => {
            // Equalize timing with the found path.
            let _ = verifier.verify(DUMMY_HASH, password);
            return Err(AuthenticationError::UserNotFound(id));
        }
        Err(UserProviderError::Backend(e)) => return Err(e.into()),
    };

    if !verifier.verify(&user.password_hash, password)? {
        return Err(AuthenticationError::BadCredentials);
    }
    if !user.enabled {
        return Err(AuthenticationError::AccountDisabled);
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> InMemoryUserProvider {
        InMemoryUserProvider::new([
            User::new("app", "Alice", "wonderland", ["ROLE_USER"]),
            User::new("app", "mallory", "pw", ["ROLE_USER"]).disabled(),
        ])
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let users = provider();
        assert_eq!(users.load_user_by_identifier("ALICE").unwrap().identifier, "Alice");
        assert!(matches!(
            users.load_user_by_identifier("bob"),
            Err(UserProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_check_credentials() {
        let users = provider();
        let verifier = PlaintextPasswordVerifier;

        assert!(check_credentials(&users, &verifier, "alice", "wonderland").is_ok());
        assert_eq!(
            check_credentials(&users, &verifier, "alice", "nope").unwrap_err(),
            AuthenticationError::BadCredentials
        );
        assert_eq!(
            check_credentials(&users, &verifier, "bob", "x").unwrap_err().normalized(),
            AuthenticationError::BadCredentials
        );
        assert_eq!(
            check_credentials(&users, &verifier, "", "x").unwrap_err(),
            AuthenticationError::BadCredentials
        );
    }

    #[test]
    fn test_disabled_reported_only_with_valid_password() {
        let users = provider();
        let verifier = PlaintextPasswordVerifier;
        assert_eq!(
            check_credentials(&users, &verifier, "mallory", "wrong").unwrap_err(),
            AuthenticationError::BadCredentials
        );
        assert_eq!(
            check_credentials(&users, &verifier, "mallory", "pw").unwrap_err(),
            AuthenticationError::AccountDisabled
        );
    }

    #[derive(Debug)]
    struct BrokenVerifier;

    impl PasswordVerifier for BrokenVerifier {
        fn verify(&self, _: &str, _: &str) -> Result<bool, BackendError> {
            Err(BackendError::Unavailable("hsm offline".into()))
        }
    }

    #[test]
    fn test_verifier_failure_fails_closed() {
        let err = check_credentials(&provider(), &BrokenVerifier, "alice", "wonderland").unwrap_err();
        assert!(matches!(err, AuthenticationError::Backend(_)));
    }
}
