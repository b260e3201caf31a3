//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, paths absolute)
//! - Compile every pattern once so bad patterns fail at load time
//! - Detect duplicate firewalls and incomplete remember-me setups
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatehouseConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{
    AccessControlConfig, AuthenticatorConfig, FirewallConfig, GatehouseConfig, RememberMeStrategy,
};
use crate::security::matcher::{AndMatcher, PathMatcher};

/// One semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatehouseConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be greater than zero"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }
    if config.session.cookie_name.trim().is_empty() {
        errors.push(ValidationError::new("session.cookie_name", "must not be empty"));
    }
    if config.session.idle_timeout_secs == 0 {
        errors.push(ValidationError::new("session.idle_timeout_secs", "must be greater than zero"));
    }
    if config.session.max_lifetime_secs < config.session.idle_timeout_secs {
        errors.push(ValidationError::new(
            "session.max_lifetime_secs",
            "must not be shorter than session.idle_timeout_secs",
        ));
    }

    let mut names = HashSet::new();
    for (i, firewall) in config.firewalls.iter().enumerate() {
        if !names.insert(firewall.name.as_str()) {
            errors.push(ValidationError::new(
                format!("firewalls[{i}].name"),
                format!("duplicate firewall name \"{}\"", firewall.name),
            ));
        }
        validate_firewall(i, firewall, &mut errors);
    }

    for (i, rule) in config.access_control.iter().enumerate() {
        validate_access_rule(i, rule, &mut errors);
    }

    let mut identifiers = HashSet::new();
    for (i, user) in config.users.iter().enumerate() {
        if user.identifier.trim().is_empty() {
            errors.push(ValidationError::new(format!("users[{i}].identifier"), "must not be empty"));
        } else if !identifiers.insert(user.identifier.to_lowercase()) {
            errors.push(ValidationError::new(
                format!("users[{i}].identifier"),
                format!("duplicate user \"{}\"", user.identifier),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_firewall(i: usize, firewall: &FirewallConfig, errors: &mut Vec<ValidationError>) {
    let field = |name: &str| format!("firewalls[{i}].{name}");

    if firewall.name.trim().is_empty() {
        errors.push(ValidationError::new(field("name"), "must not be empty"));
    }
    if let Some(pattern) = &firewall.pattern {
        if let Err(e) = PathMatcher::new(pattern.as_str()) {
            errors.push(ValidationError::new(field("pattern"), e.to_string()));
        }
    }

    for (j, authenticator) in firewall.authenticators.iter().enumerate() {
        let auth_field = |name: &str| format!("firewalls[{i}].authenticators[{j}].{name}");
        match authenticator {
            AuthenticatorConfig::FormLogin(form) => {
                if !form.login_path.starts_with('/') {
                    errors.push(ValidationError::new(auth_field("login_path"), "must be an absolute path"));
                }
                if !form.check_path.starts_with('/') {
                    errors.push(ValidationError::new(auth_field("check_path"), "must be an absolute path"));
                }
                if form.enable_csrf && firewall.stateless {
                    errors.push(ValidationError::new(
                        auth_field("enable_csrf"),
                        "CSRF protection requires a stateful firewall",
                    ));
                }
            }
            AuthenticatorConfig::HttpBasic(basic) => {
                if basic.realm.trim().is_empty() {
                    errors.push(ValidationError::new(auth_field("realm"), "must not be empty"));
                }
            }
        }
    }

    if let Some(remember_me) = &firewall.remember_me {
        if remember_me.name.trim().is_empty() {
            errors.push(ValidationError::new(field("remember_me.name"), "must not be empty"));
        }
        if remember_me.lifetime_secs == 0 {
            errors.push(ValidationError::new(field("remember_me.lifetime_secs"), "must be greater than zero"));
        }
        let has_secret = remember_me.secret.as_deref().is_some_and(|s| !s.is_empty());
        if remember_me.strategy == RememberMeStrategy::Signature && !has_secret {
            errors.push(ValidationError::new(
                field("remember_me.secret"),
                "the signature strategy requires a secret",
            ));
        }
    }

    if let Some(throttling) = &firewall.login_throttling {
        if throttling.max_attempts == 0 {
            errors.push(ValidationError::new(field("login_throttling.max_attempts"), "must be greater than zero"));
        }
        if throttling.interval_secs == 0 {
            errors.push(ValidationError::new(field("login_throttling.interval_secs"), "must be greater than zero"));
        }
        if throttling.global_max_attempts == Some(0) {
            errors.push(ValidationError::new(
                field("login_throttling.global_max_attempts"),
                "must be greater than zero",
            ));
        }
    }

    if let Some(logout) = &firewall.logout {
        if !logout.path.starts_with('/') {
            errors.push(ValidationError::new(field("logout.path"), "must be an absolute path"));
        }
        if !logout.target.starts_with('/') {
            errors.push(ValidationError::new(field("logout.target"), "must be an absolute path"));
        }
    }
}

fn validate_access_rule(i: usize, rule: &AccessControlConfig, errors: &mut Vec<ValidationError>) {
    let field = |name: &str| format!("access_control[{i}].{name}");

    if let Err(e) = AndMatcher::from_parts(Some(&rule.path), rule.host.as_deref(), &rule.methods) {
        errors.push(ValidationError::new(field("path"), e.to_string()));
    }
    if rule.attributes.is_empty() {
        errors.push(ValidationError::new(field("attributes"), "at least one attribute is required"));
    }
    if let Some(channel) = &rule.requires_channel {
        if channel != "http" && channel != "https" {
            errors.push(ValidationError::new(
                field("requires_channel"),
                format!("unknown channel \"{channel}\" (expected http or https)"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LoginThrottlingConfig, RememberMeConfig};

    fn firewall(name: &str) -> FirewallConfig {
        FirewallConfig {
            name: name.to_string(),
            pattern: None,
            host: None,
            stateless: false,
            authenticators: Vec::new(),
            remember_me: None,
            login_throttling: None,
            logout: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatehouseConfig::default()).is_ok());
    }

    #[test]
    fn test_all_errors_are_reported() {
        let mut config = GatehouseConfig::default();
        config.firewalls.push(firewall("main"));
        let mut dup = firewall("main");
        dup.pattern = Some("^/broken(".into());
        dup.remember_me = Some(RememberMeConfig {
            strategy: RememberMeStrategy::Signature,
            ..RememberMeConfig::default()
        });
        dup.login_throttling = Some(LoginThrottlingConfig {
            max_attempts: 0,
            ..LoginThrottlingConfig::default()
        });
        config.firewalls.push(dup);
        config.access_control.push(AccessControlConfig {
            path: "/admin/*".into(),
            host: None,
            methods: vec![],
            attributes: vec!["ROLE_ADMIN".into()],
            requires_channel: Some("gopher".into()),
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"firewalls[1].name"));
        assert!(fields.contains(&"firewalls[1].pattern"));
        assert!(fields.contains(&"firewalls[1].remember_me.secret"));
        assert!(fields.contains(&"firewalls[1].login_throttling.max_attempts"));
        assert!(fields.contains(&"access_control[0].requires_channel"));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_session_lifetimes_are_checked() {
        let mut config = GatehouseConfig::default();
        config.session.idle_timeout_secs = 3_600;
        config.session.max_lifetime_secs = 600;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "session.max_lifetime_secs");
    }

    #[test]
    fn test_stateless_csrf_is_rejected() {
        let mut config = GatehouseConfig::default();
        let mut api = firewall("api");
        api.stateless = true;
        api.authenticators
            .push(AuthenticatorConfig::FormLogin(Default::default()));
        config.firewalls.push(api);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "firewalls[0].authenticators[0].enable_csrf");
    }
}
