//! Persistent (series/token) remember-me.
//!
//! # Consume sequence
//! ```text
//! parse ─► load series ─► compare token (constant time)
//!   mismatch ─► delete series, CookieTheft
//! ─► identity check ─► cookie expiry ─► idle expiry (delete)
//! ─► user class supported ─► load user
//! ─► rotate: CAS(series, old, new)
//!   lost race ─► delete series, CookieTheft
//! ─► fresh cookie with the new token
//! ```

use std::sync::Arc;

use crate::http::cookie::Cookie;
use crate::security::clock::Clock;
use crate::security::crypto::{constant_time_str_eq, random_token};
use crate::security::error::{AuthenticationError, BackendError};
use crate::security::remember_me::details::RememberMeDetails;
use crate::security::remember_me::token_provider::{PersistentLoginRecord, TokenProvider};
use crate::security::remember_me::RememberMeOptions;
use crate::security::user::{User, UserProvider};

#[derive(Debug)]
pub struct PersistentRememberMe {
    options: RememberMeOptions,
    tokens: Arc<dyn TokenProvider>,
    users: Arc<dyn UserProvider>,
    clock: Arc<dyn Clock>,
}

impl PersistentRememberMe {
    pub fn new(
        options: RememberMeOptions,
        tokens: Arc<dyn TokenProvider>,
        users: Arc<dyn UserProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            options,
            tokens,
            users,
            clock,
        }
    }

    pub fn options(&self) -> &RememberMeOptions {
        &self.options
    }

    fn lifetime_secs(&self) -> u64 {
        self.options.lifetime.as_secs()
    }

    pub fn create_cookie(&self, user: &User) -> Result<Cookie, BackendError> {
        let now = self.clock.unix_now();
        let series = random_token();
        let token_value = random_token();

        self.tokens.create_new_token(PersistentLoginRecord {
            series: series.clone(),
            token_value: token_value.clone(),
            user_class: user.class.clone(),
            user_identifier: user.identifier.clone(),
            last_used: now,
        })?;

        let details = RememberMeDetails::new(
            user.class.clone(),
            user.identifier.clone(),
            now + self.lifetime_secs(),
            format!("{series}:{token_value}"),
        );
        Ok(self.options.cookie(&details))
    }

    pub fn consume_cookie(&self, raw: &str) -> Result<(User, Cookie), AuthenticationError> {
        let details = RememberMeDetails::from_raw(raw)?;
        let now = self.clock.unix_now();

        let (series, token_value) = match details.value.split_once(':') {
            Some((s, t)) if !s.is_empty() && !t.is_empty() => (s.to_string(), t.to_string()),
            _ => return Err(AuthenticationError::InvalidCookie("missing series or token")),
        };

        let record = self
            .tokens
            .load_token_by_series(&series)?
            .ok_or(AuthenticationError::TokenNotFound)?;

        if !constant_time_str_eq(&record.token_value, &token_value) {
            self.tokens.delete_token_by_series(&series)?;
            tracing::warn!(
                security_event = "cookie_theft",
                user = %record.user_identifier,
                "Remember-me token mismatch on a known series; series revoked"
            );
            return Err(AuthenticationError::CookieTheft);
        }

        if record.user_class != details.user_class || record.user_identifier != details.user_identifier {
            return Err(AuthenticationError::InvalidCookie("identity does not match series"));
        }

        // Checked after the comparison so a stale stolen cookie still trips theft.
        if details.expires < now {
            return Err(AuthenticationError::CookieExpired);
        }

        if record.last_used.saturating_add(self.lifetime_secs()) < now {
            self.tokens.delete_token_by_series(&series)?;
            return Err(AuthenticationError::CookieExpired);
        }

        if !self.users.supports_class(&record.user_class) {
            return Err(AuthenticationError::InvalidCookie("unsupported user class"));
        }
        let user = self.users.load_user_by_identifier(&record.user_identifier)?;
        if !user.enabled {
            return Err(AuthenticationError::AccountDisabled);
        }

        let new_value = random_token();
        if !self.tokens.update_token(&series, &token_value, &new_value, now)? {
            self.tokens.delete_token_by_series(&series)?;
            tracing::warn!(
                security_event = "cookie_theft",
                user = %record.user_identifier,
                "Remember-me series rotated concurrently; series revoked"
            );
            return Err(AuthenticationError::CookieTheft);
        }

        let fresh = RememberMeDetails {
            expires: now + self.lifetime_secs(),
            value: format!("{series}:{new_value}"),
            ..details
        };
        Ok((user, self.options.cookie(&fresh)))
    }

    /// Drop the series referenced by `raw`, if any.
    pub fn clear(&self, raw: &str) -> Result<(), BackendError> {
        let series = RememberMeDetails::from_raw(raw)
            .ok()
            .and_then(|d| d.value.split_once(':').map(|(s, _)| s.to_string()));
        match series {
            Some(series) => self.tokens.delete_token_by_series(&series),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::MockClock;
    use crate::security::remember_me::token_provider::MemoryTokenProvider;
    use crate::security::user::InMemoryUserProvider;
    use std::time::Duration;

    struct Fixture {
        handler: PersistentRememberMe,
        tokens: Arc<MemoryTokenProvider>,
        clock: Arc<MockClock>,
        alice: User,
    }

    /// Loses every rotation to a request that rotated the series first.
    #[derive(Debug, Default)]
    struct ConcurrentRotation {
        inner: MemoryTokenProvider,
    }

    impl TokenProvider for ConcurrentRotation {
        fn load_token_by_series(&self, series: &str) -> Result<Option<PersistentLoginRecord>, BackendError> {
            self.inner.load_token_by_series(series)
        }

        fn create_new_token(&self, record: PersistentLoginRecord) -> Result<(), BackendError> {
            self.inner.create_new_token(record)
        }

        fn update_token(&self, series: &str, expected: &str, new_value: &str, last_used: u64) -> Result<bool, BackendError> {
            assert!(self.inner.update_token(series, expected, "rotated-elsewhere", last_used)?);
            self.inner.update_token(series, expected, new_value, last_used)
        }

        fn delete_token_by_series(&self, series: &str) -> Result<(), BackendError> {
            self.inner.delete_token_by_series(series)
        }
    }

    fn handler_with(tokens: Arc<dyn TokenProvider>, clock: Arc<MockClock>, alice: &User) -> PersistentRememberMe {
        let options = RememberMeOptions {
            lifetime: Duration::from_secs(3_600),
            ..RememberMeOptions::default()
        };
        PersistentRememberMe::new(
            options,
            tokens,
            Arc::new(InMemoryUserProvider::new([alice.clone()])),
            clock,
        )
    }

    fn fixture() -> Fixture {
        let alice = User::new("app", "alice", "pw", ["ROLE_USER"]);
        let tokens = Arc::new(MemoryTokenProvider::new());
        let clock = Arc::new(MockClock::new(1_700_000_000));
        let handler = handler_with(tokens.clone(), clock.clone(), &alice);
        Fixture {
            handler,
            tokens,
            clock,
            alice,
        }
    }

    fn series_and_value(cookie: &Cookie) -> (String, String) {
        let details = RememberMeDetails::from_raw(&cookie.value).unwrap();
        let (s, v) = details.value.split_once(':').unwrap();
        (s.to_string(), v.to_string())
    }

    #[test]
    fn test_consume_rotates_value() {
        let f = fixture();
        let c1 = f.handler.create_cookie(&f.alice).unwrap();
        let (series, v1) = series_and_value(&c1);

        let (user, c2) = f.handler.consume_cookie(&c1.value).unwrap();
        assert_eq!(user.identifier, "alice");
        let (series2, v2) = series_and_value(&c2);
        assert_eq!(series2, series);
        assert_ne!(v2, v1);
        assert_eq!(f.tokens.load_token_by_series(&series).unwrap().unwrap().token_value, v2);
    }

    #[test]
    fn test_replayed_value_is_theft_and_revokes_series() {
        let f = fixture();
        let c1 = f.handler.create_cookie(&f.alice).unwrap();
        let (_, c2) = f.handler.consume_cookie(&c1.value).unwrap();

        assert_eq!(
            f.handler.consume_cookie(&c1.value).unwrap_err(),
            AuthenticationError::CookieTheft
        );
        // The series is gone, even for the legitimate latest cookie.
        assert_eq!(
            f.handler.consume_cookie(&c2.value).unwrap_err(),
            AuthenticationError::TokenNotFound
        );
    }

    #[test]
    fn test_stale_rotated_cookie_is_still_theft() {
        let f = fixture();
        let c1 = f.handler.create_cookie(&f.alice).unwrap();
        let (series, _) = series_and_value(&c1);

        f.clock.advance(Duration::from_secs(1_800));
        let (_, c2) = f.handler.consume_cookie(&c1.value).unwrap();

        // c1's own expiry has passed, c2 and the series are still live.
        f.clock.advance(Duration::from_secs(1_900));
        assert_eq!(
            f.handler.consume_cookie(&c1.value).unwrap_err(),
            AuthenticationError::CookieTheft
        );
        assert!(f.tokens.load_token_by_series(&series).unwrap().is_none());
        assert_eq!(
            f.handler.consume_cookie(&c2.value).unwrap_err(),
            AuthenticationError::TokenNotFound
        );
    }

    #[test]
    fn test_lost_rotation_race_is_theft() {
        let alice = User::new("app", "alice", "pw", ["ROLE_USER"]);
        let tokens = Arc::new(ConcurrentRotation::default());
        let handler = handler_with(tokens.clone(), Arc::new(MockClock::new(1_700_000_000)), &alice);
        let c1 = handler.create_cookie(&alice).unwrap();
        let (series, _) = series_and_value(&c1);

        assert_eq!(
            handler.consume_cookie(&c1.value).unwrap_err(),
            AuthenticationError::CookieTheft
        );
        assert!(tokens.load_token_by_series(&series).unwrap().is_none());
    }

    #[test]
    fn test_unsupported_user_class_is_rejected() {
        let f = fixture();
        let outsider = User::new("ldap", "alice", "pw", ["ROLE_USER"]);
        let cookie = f.handler.create_cookie(&outsider).unwrap();
        assert_eq!(
            f.handler.consume_cookie(&cookie.value).unwrap_err(),
            AuthenticationError::InvalidCookie("unsupported user class")
        );
    }

    #[test]
    fn test_idle_expiry_deletes_record() {
        let f = fixture();
        let c1 = f.handler.create_cookie(&f.alice).unwrap();
        let (series, _) = series_and_value(&c1);

        // Forge a cookie whose own expiry is far away so only idle time expires.
        let mut details = RememberMeDetails::from_raw(&c1.value).unwrap();
        details.expires += 10_000;
        f.clock.advance(Duration::from_secs(3_601));

        assert_eq!(
            f.handler.consume_cookie(&details.to_cookie_value()).unwrap_err(),
            AuthenticationError::CookieExpired
        );
        assert!(f.tokens.load_token_by_series(&series).unwrap().is_none());
    }

    #[test]
    fn test_cookie_expiry_in_past() {
        let f = fixture();
        let c1 = f.handler.create_cookie(&f.alice).unwrap();
        f.clock.advance(Duration::from_secs(3_601));
        assert_eq!(
            f.handler.consume_cookie(&c1.value).unwrap_err(),
            AuthenticationError::CookieExpired
        );
    }

    #[test]
    fn test_identity_mismatch_is_rejected() {
        let f = fixture();
        let c1 = f.handler.create_cookie(&f.alice).unwrap();
        let details = RememberMeDetails::from_raw(&c1.value).unwrap();
        let forged = RememberMeDetails {
            user_identifier: "admin".into(),
            ..details
        };
        assert!(matches!(
            f.handler.consume_cookie(&forged.to_cookie_value()).unwrap_err(),
            AuthenticationError::InvalidCookie(_)
        ));
    }

    #[test]
    fn test_unknown_series() {
        let f = fixture();
        let raw = RememberMeDetails::new("app", "alice", 1_800_000_000, "nope:nope").to_cookie_value();
        assert_eq!(
            f.handler.consume_cookie(&raw).unwrap_err(),
            AuthenticationError::TokenNotFound
        );
    }

    #[test]
    fn test_clear_deletes_series() {
        let f = fixture();
        let c1 = f.handler.create_cookie(&f.alice).unwrap();
        f.handler.clear(&c1.value).unwrap();
        assert!(f.tokens.is_empty());
        f.handler.clear("garbage").unwrap();
    }
}
