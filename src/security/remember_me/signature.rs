//! Signed (stateless) remember-me.
//!
//! The cookie value is `hex(HMAC-SHA256(secret, class ':' identifier ':'
//! expires ':' password_hash))` with class and identifier field-encoded.
//! Changing the password changes the expected signature, so every
//! outstanding cookie of that user stops validating.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

use crate::http::cookie::Cookie;
use crate::security::clock::Clock;
use crate::security::crypto::encode_field;
use crate::security::error::{AuthenticationError, BackendError};
use crate::security::remember_me::details::RememberMeDetails;
use crate::security::remember_me::RememberMeOptions;
use crate::security::user::{User, UserProvider};

type HmacSha256 = Hmac<Sha256>;

pub struct SignatureRememberMe {
    options: RememberMeOptions,
    secret: Vec<u8>,
    users: Arc<dyn UserProvider>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SignatureRememberMe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureRememberMe")
            .field("options", &self.options)
            .field("secret", &"<redacted>")
            .field("users", &self.users)
            .finish_non_exhaustive()
    }
}

impl SignatureRememberMe {
    pub fn new(
        options: RememberMeOptions,
        secret: impl Into<Vec<u8>>,
        users: Arc<dyn UserProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            options,
            secret: secret.into(),
            users,
            clock,
        }
    }

    pub fn options(&self) -> &RememberMeOptions {
        &self.options
    }

    fn mac(&self, class: &str, identifier: &str, expires: u64, password_hash: &str) -> Result<HmacSha256, BackendError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| BackendError::Corrupt(format!("HMAC key error: {e}")))?;
        mac.update(encode_field(class).as_bytes());
        mac.update(b":");
        mac.update(encode_field(identifier).as_bytes());
        mac.update(b":");
        mac.update(expires.to_string().as_bytes());
        mac.update(b":");
        mac.update(password_hash.as_bytes());
        Ok(mac)
    }

    fn signed_cookie(&self, user: &User, expires: u64) -> Result<Cookie, BackendError> {
        let signature = self
            .mac(&user.class, &user.identifier, expires, &user.password_hash)?
            .finalize()
            .into_bytes();
        let details = RememberMeDetails::new(
            user.class.clone(),
            user.identifier.clone(),
            expires,
            hex::encode(signature),
        );
        Ok(self.options.cookie(&details))
    }

    pub fn create_cookie(&self, user: &User) -> Result<Cookie, BackendError> {
        let expires = self.clock.unix_now() + self.options.lifetime.as_secs();
        self.signed_cookie(user, expires)
    }

    pub fn consume_cookie(&self, raw: &str) -> Result<(User, Cookie), AuthenticationError> {
        let details = RememberMeDetails::from_raw(raw)?;
        let now = self.clock.unix_now();
        if details.expires < now {
            return Err(AuthenticationError::CookieExpired);
        }

        let signature = hex::decode(&details.value)
            .map_err(|_| AuthenticationError::InvalidCookie("signature is not hex"))?;

        if !self.users.supports_class(&details.user_class) {
            return Err(AuthenticationError::InvalidCookie("unsupported user class"));
        }
        let user = self.users.load_user_by_identifier(&details.user_identifier)?;
        if user.class != details.user_class {
            return Err(AuthenticationError::InvalidCookie("user class mismatch"));
        }

        self.mac(&details.user_class, &details.user_identifier, details.expires, &user.password_hash)?
            .verify_slice(&signature)
            .map_err(|_| AuthenticationError::InvalidCookie("signature mismatch"))?;

        if !user.enabled {
            return Err(AuthenticationError::AccountDisabled);
        }

        let cookie = self.signed_cookie(&user, now + self.options.lifetime.as_secs())?;
        Ok((user, cookie))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::MockClock;
    use crate::security::user::InMemoryUserProvider;
    use std::time::Duration;

    fn handler() -> (SignatureRememberMe, Arc<InMemoryUserProvider>, Arc<MockClock>) {
        let users = Arc::new(InMemoryUserProvider::new([User::new("app", "alice", "hash-1", ["ROLE_USER"])]));
        let clock = Arc::new(MockClock::new(1_700_000_000));
        let handler = SignatureRememberMe::new(
            RememberMeOptions {
                lifetime: Duration::from_secs(3_600),
                ..RememberMeOptions::default()
            },
            b"s3cr3t".to_vec(),
            users.clone(),
            clock.clone(),
        );
        (handler, users, clock)
    }

    #[test]
    fn test_valid_cookie_is_accepted_and_reissued() {
        let (handler, users, clock) = handler();
        let alice = users.load_user_by_identifier("alice").unwrap();
        let cookie = handler.create_cookie(&alice).unwrap();

        clock.advance(Duration::from_secs(60));
        let (user, fresh) = handler.consume_cookie(&cookie.value).unwrap();
        assert_eq!(user.identifier, "alice");
        assert_ne!(fresh.value, cookie.value);
    }

    #[test]
    fn test_debug_hides_secret() {
        let (handler, _, _) = handler();
        let printed = format!("{handler:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("s3cr3t"));
    }

    #[test]
    fn test_password_change_invalidates_cookie() {
        let (handler, users, _) = handler();
        let alice = users.load_user_by_identifier("alice").unwrap();
        let cookie = handler.create_cookie(&alice).unwrap();

        users.update_password("alice", "hash-2");
        assert!(matches!(
            handler.consume_cookie(&cookie.value).unwrap_err(),
            AuthenticationError::InvalidCookie(_)
        ));
    }

    #[test]
    fn test_tampered_expiry_is_rejected() {
        let (handler, users, _) = handler();
        let alice = users.load_user_by_identifier("alice").unwrap();
        let cookie = handler.create_cookie(&alice).unwrap();

        let mut details = RememberMeDetails::from_raw(&cookie.value).unwrap();
        details.expires += 86_400;
        assert!(matches!(
            handler.consume_cookie(&details.to_cookie_value()).unwrap_err(),
            AuthenticationError::InvalidCookie(_)
        ));
    }

    #[test]
    fn test_expired_cookie() {
        let (handler, users, clock) = handler();
        let alice = users.load_user_by_identifier("alice").unwrap();
        let cookie = handler.create_cookie(&alice).unwrap();
        clock.advance(Duration::from_secs(3_601));
        assert_eq!(
            handler.consume_cookie(&cookie.value).unwrap_err(),
            AuthenticationError::CookieExpired
        );
    }

    #[test]
    fn test_unknown_user() {
        let (handler, _, _) = handler();
        let raw = RememberMeDetails::new("app", "ghost", 1_800_000_000, "00ff").to_cookie_value();
        assert_eq!(
            handler.consume_cookie(&raw).unwrap_err().normalized(),
            AuthenticationError::BadCredentials
        );
    }
}
