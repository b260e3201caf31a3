//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::http::cookie::SameSite;
use crate::security::access_decision::DecisionStrategy;
use crate::security::rate_limit::RateLimitPolicy;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GatehouseConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Session cookie settings.
    pub session: SessionConfig,

    /// Firewalls, checked in order; the first whose matcher fits handles the request.
    pub firewalls: Vec<FirewallConfig>,

    /// Access rules, checked in order; the first match wins.
    pub access_control: Vec<AccessControlConfig>,

    /// Voting strategy.
    pub access_decision: AccessDecisionConfig,

    /// Users of the built-in in-memory provider.
    pub users: Vec<UserConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum buffered request body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 64 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` expression). `RUST_LOG` takes precedence.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie_path: String,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,

    /// Seconds without a request before the session expires.
    pub idle_timeout_secs: u64,

    /// Seconds after creation before the session expires regardless of activity.
    pub max_lifetime_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "GATEHOUSE_SESSION".to_string(),
            cookie_path: "/".to_string(),
            cookie_secure: false,
            cookie_same_site: SameSite::Lax,
            idle_timeout_secs: 30 * 60,
            max_lifetime_secs: 8 * 60 * 60,
        }
    }
}

/// One firewall.
#[derive(Debug, Clone, Deserialize)]
pub struct FirewallConfig {
    /// Unique name; also the token storage key.
    pub name: String,

    /// Path pattern (glob, or regex starting with `^`). `None` matches all.
    #[serde(default)]
    pub pattern: Option<String>,

    /// Host to match (case-insensitive).
    #[serde(default)]
    pub host: Option<String>,

    /// Stateless firewalls never read or write the session.
    #[serde(default)]
    pub stateless: bool,

    /// Authenticators, tried in declaration order.
    #[serde(default)]
    pub authenticators: Vec<AuthenticatorConfig>,

    #[serde(default)]
    pub remember_me: Option<RememberMeConfig>,

    #[serde(default)]
    pub login_throttling: Option<LoginThrottlingConfig>,

    #[serde(default)]
    pub logout: Option<LogoutConfig>,
}

/// Authenticator definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthenticatorConfig {
    FormLogin(FormLoginConfig),
    HttpBasic(HttpBasicConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FormLoginConfig {
    pub login_path: String,
    pub check_path: String,
    pub default_target_path: String,
    pub always_use_default_target_path: bool,
    pub username_parameter: String,
    pub password_parameter: String,
    pub enable_csrf: bool,
}

impl Default for FormLoginConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            check_path: "/login".to_string(),
            default_target_path: "/".to_string(),
            always_use_default_target_path: false,
            username_parameter: "_username".to_string(),
            password_parameter: "_password".to_string(),
            enable_csrf: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpBasicConfig {
    pub realm: String,
}

impl Default for HttpBasicConfig {
    fn default() -> Self {
        Self {
            realm: "Secured Area".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RememberMeStrategy {
    #[default]
    Persistent,
    Signature,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RememberMeConfig {
    pub strategy: RememberMeStrategy,

    /// HMAC key of the signature strategy.
    pub secret: Option<String>,

    pub name: String,
    pub lifetime_secs: u64,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    pub parameter: String,
    pub always_remember_me: bool,
}

impl Default for RememberMeConfig {
    fn default() -> Self {
        Self {
            strategy: RememberMeStrategy::Persistent,
            secret: None,
            name: "REMEMBERME".to_string(),
            lifetime_secs: 31_536_000,
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: Some(SameSite::Lax),
            parameter: "_remember_me".to_string(),
            always_remember_me: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginThrottlingConfig {
    pub policy: RateLimitPolicy,

    /// Attempts per (username, IP) within `interval_secs`.
    pub max_attempts: u32,

    pub interval_secs: u64,

    /// Attempts per IP. Defaults to five times `max_attempts`.
    pub global_max_attempts: Option<u32>,
}

impl LoginThrottlingConfig {
    pub fn effective_global_max_attempts(&self) -> u32 {
        self.global_max_attempts
            .unwrap_or_else(|| self.max_attempts.saturating_mul(5))
    }
}

impl Default for LoginThrottlingConfig {
    fn default() -> Self {
        Self {
            policy: RateLimitPolicy::FixedWindow,
            max_attempts: 5,
            interval_secs: 60,
            global_max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogoutConfig {
    pub path: String,
    pub target: String,
    pub invalidate_session: bool,
    pub clear_csrf: bool,
}

impl Default for LogoutConfig {
    fn default() -> Self {
        Self {
            path: "/logout".to_string(),
            target: "/".to_string(),
            invalidate_session: true,
            clear_csrf: true,
        }
    }
}

/// Access rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessControlConfig {
    /// Path pattern (glob, or regex starting with `^`).
    pub path: String,

    #[serde(default)]
    pub host: Option<String>,

    /// Restrict the rule to these methods. Empty matches every method.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Required attributes (roles, `IS_AUTHENTICATED*`, `PUBLIC_ACCESS`).
    #[serde(default)]
    pub attributes: Vec<String>,

    /// "http" or "https".
    #[serde(default)]
    pub requires_channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessDecisionConfig {
    pub strategy: DecisionStrategy,
    pub allow_if_all_abstain: bool,
    pub allow_if_equal: bool,

    /// Role → roles it implies.
    pub role_hierarchy: HashMap<String, Vec<String>>,
}

impl Default for AccessDecisionConfig {
    fn default() -> Self {
        Self {
            strategy: DecisionStrategy::Affirmative,
            allow_if_all_abstain: false,
            allow_if_equal: true,
            role_hierarchy: HashMap::new(),
        }
    }
}

/// A user of the in-memory provider.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub identifier: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
