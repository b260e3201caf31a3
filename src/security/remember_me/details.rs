//! Remember-me cookie payload.
//!
//! ```text
//! base64(class) ':' base64(identifier) ':' expires ':' value
//! ```
//! `value` is strategy specific (`series ':' token` for persistent logins,
//! a hex signature for signed cookies) and may itself contain `:`.

use crate::security::crypto::{decode_field, encode_field};
use crate::security::error::AuthenticationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberMeDetails {
    pub user_class: String,
    pub user_identifier: String,
    /// Unix seconds.
    pub expires: u64,
    pub value: String,
}

impl RememberMeDetails {
    pub fn new(
        user_class: impl Into<String>,
        user_identifier: impl Into<String>,
        expires: u64,
        value: impl Into<String>,
    ) -> Self {
        Self {
            user_class: user_class.into(),
            user_identifier: user_identifier.into(),
            expires,
            value: value.into(),
        }
    }

    /// Parse a raw cookie value. Structural errors are generic failures.
    pub fn from_raw(raw: &str) -> Result<Self, AuthenticationError> {
        let mut parts = raw.splitn(4, ':');
        let (Some(class), Some(identifier), Some(expires), Some(value)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthenticationError::InvalidCookie("wrong number of parts"));
        };

        let user_class =
            decode_field(class).ok_or(AuthenticationError::InvalidCookie("undecodable class"))?;
        let user_identifier = decode_field(identifier)
            .ok_or(AuthenticationError::InvalidCookie("undecodable identifier"))?;
        let expires = expires
            .parse::<u64>()
            .map_err(|_| AuthenticationError::InvalidCookie("invalid expiry"))?;
        if user_class.is_empty() || user_identifier.is_empty() || value.is_empty() {
            return Err(AuthenticationError::InvalidCookie("empty field"));
        }

        Ok(Self {
            user_class,
            user_identifier,
            expires,
            value: value.to_string(),
        })
    }

    pub fn to_cookie_value(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            encode_field(&self.user_class),
            encode_field(&self.user_identifier),
            self.expires,
            self.value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_with_delimiter_survives() {
        let details = RememberMeDetails::new("app", "a:b:c", 1_700_000_000, "series:token");
        let raw = details.to_cookie_value();
        assert_eq!(raw.matches(':').count(), 4);
        assert_eq!(RememberMeDetails::from_raw(&raw).unwrap(), details);
    }

    #[test]
    fn test_malformed_cookies() {
        for raw in ["", "abc", "YXBw:YWxpY2U=:123", "YXBw:YWxpY2U=:soon:v", "!!:YWxpY2U=:1:v", "YXBw:YWxpY2U=:1:"] {
            let err = RememberMeDetails::from_raw(raw).unwrap_err();
            assert!(matches!(err, AuthenticationError::InvalidCookie(_)), "{raw}: {err:?}");
        }
    }
}
