//! Building a `FirewallMap` from validated configuration.
//!
//! Collaborators (user provider, verifier, persisted-token backend,
//! rate-limit store, clock) are injected, never created from config, so state
//! that must outlive a reload (remember-me records, throttle buckets) does.

use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::{
    AccessControlConfig, AccessDecisionConfig, AuthenticatorConfig, FirewallConfig, GatehouseConfig,
    LoginThrottlingConfig, RememberMeConfig, RememberMeStrategy, UserConfig,
};
use crate::http::request::Channel;
use crate::security::access_decision::{AccessDecisionManager, AuthenticatedVoter, RoleHierarchy, RoleVoter};
use crate::security::access_map::{AccessMap, AccessRule};
use crate::security::authenticator::{Authenticator, FormLoginAuthenticator, FormLoginOptions, HttpBasicAuthenticator};
use crate::security::clock::{Clock, SystemClock};
use crate::security::error::ConfigurationError;
use crate::security::firewall::{Firewall, FirewallMap};
use crate::security::logout::Logout;
use crate::security::matcher::AndMatcher;
use crate::security::rate_limit::{LimiterSpec, LoginRateLimiter, MemoryRateLimitStore, RateLimitStore};
use crate::security::remember_me::{
    MemoryTokenProvider, PersistentRememberMe, RememberMeHandler, RememberMeOptions, SignatureRememberMe,
    TokenProvider,
};
use crate::security::user::{InMemoryUserProvider, PasswordVerifier, PlaintextPasswordVerifier, User, UserProvider, DEFAULT_USER_CLASS};

/// External services the firewalls are wired to.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub users: Option<Arc<dyn UserProvider>>,
    pub verifier: Option<Arc<dyn PasswordVerifier>>,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
    pub rate_limit_store: Option<Arc<dyn RateLimitStore>>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            users: None,
            verifier: None,
            token_provider: None,
            rate_limit_store: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl Collaborators {
    /// In-process collaborators: configured users with plaintext passwords,
    /// in-memory remember-me records and throttle buckets.
    pub fn in_memory(users: &[UserConfig]) -> Self {
        Self {
            users: Some(users_from_config(users)),
            verifier: Some(Arc::new(PlaintextPasswordVerifier)),
            token_provider: Some(Arc::new(MemoryTokenProvider::new())),
            rate_limit_store: Some(Arc::new(MemoryRateLimitStore::new())),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_users(mut self, users: Arc<dyn UserProvider>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn users(&self) -> Result<Arc<dyn UserProvider>, ConfigurationError> {
        self.users
            .clone()
            .ok_or(ConfigurationError::MissingCollaborator("user provider"))
    }

    fn verifier(&self) -> Result<Arc<dyn PasswordVerifier>, ConfigurationError> {
        self.verifier
            .clone()
            .ok_or(ConfigurationError::MissingCollaborator("password verifier"))
    }
}

/// In-memory provider holding the configured users.
pub fn users_from_config(users: &[UserConfig]) -> Arc<dyn UserProvider> {
    Arc::new(InMemoryUserProvider::new(users.iter().map(|u| {
        let user = User::new(DEFAULT_USER_CLASS, &u.identifier, &u.password, u.roles.iter().cloned());
        if u.enabled {
            user
        } else {
            user.disabled()
        }
    })))
}

impl FirewallMap {
    pub fn from_config(config: &GatehouseConfig, collaborators: &Collaborators) -> Result<Self, ConfigurationError> {
        let mut access_map = AccessMap::new();
        for rule in &config.access_control {
            access_map.add(access_rule(rule)?);
        }

        let mut map = FirewallMap::new(access_map, decision_manager(&config.access_decision));
        for firewall in &config.firewalls {
            map.add(build_firewall(firewall, collaborators)?)?;
        }
        Ok(map)
    }
}

fn access_rule(config: &AccessControlConfig) -> Result<AccessRule, ConfigurationError> {
    let matcher = AndMatcher::from_parts(Some(&config.path), config.host.as_deref(), &config.methods)?;
    let channel = match config.requires_channel.as_deref() {
        None => None,
        Some("http") => Some(Channel::Http),
        Some("https") => Some(Channel::Https),
        Some(other) => return Err(ConfigurationError::InvalidChannel(other.to_string())),
    };
    Ok(AccessRule::new(Box::new(matcher), config.attributes.clone(), channel))
}

fn decision_manager(config: &AccessDecisionConfig) -> AccessDecisionManager {
    let hierarchy = RoleHierarchy::new(config.role_hierarchy.clone());
    AccessDecisionManager::new(
        vec![Box::new(RoleVoter::new(hierarchy)), Box::new(AuthenticatedVoter)],
        config.strategy,
    )
    .with_allow_if_all_abstain(config.allow_if_all_abstain)
    .with_allow_if_equal(config.allow_if_equal)
}

fn build_firewall(config: &FirewallConfig, collaborators: &Collaborators) -> Result<Firewall, ConfigurationError> {
    let matcher = AndMatcher::from_parts(config.pattern.as_deref(), config.host.as_deref(), &[])?;
    let mut firewall = Firewall::new(&config.name, Box::new(matcher)).with_stateless(config.stateless);

    let mut csrf_token_ids = Vec::new();
    for authenticator in &config.authenticators {
        let built: Arc<dyn Authenticator> = match authenticator {
            AuthenticatorConfig::FormLogin(form) => {
                let options = FormLoginOptions {
                    login_path: form.login_path.clone(),
                    check_path: form.check_path.clone(),
                    default_target_path: form.default_target_path.clone(),
                    always_use_default_target_path: form.always_use_default_target_path,
                    username_parameter: form.username_parameter.clone(),
                    password_parameter: form.password_parameter.clone(),
                    enable_csrf: form.enable_csrf,
                    ..FormLoginOptions::default()
                };
                if options.enable_csrf {
                    csrf_token_ids.push(options.csrf_token_id.clone());
                }
                Arc::new(FormLoginAuthenticator::new(
                    &config.name,
                    options,
                    collaborators.users()?,
                    collaborators.verifier()?,
                ))
            }
            AuthenticatorConfig::HttpBasic(basic) => Arc::new(HttpBasicAuthenticator::new(
                &basic.realm,
                collaborators.users()?,
                collaborators.verifier()?,
            )),
        };
        firewall = firewall.with_authenticator(built);
    }

    let remember_me = config
        .remember_me
        .as_ref()
        .map(|rm| remember_me_handler(&config.name, rm, collaborators))
        .transpose()?
        .map(Arc::new);
    if let Some(handler) = &remember_me {
        firewall = firewall.with_remember_me(Arc::clone(handler));
    }

    if let Some(throttling) = &config.login_throttling {
        firewall = firewall.with_login_throttling(login_limiter(&config.name, throttling, collaborators)?);
    }

    if let Some(logout) = &config.logout {
        firewall = firewall.with_logout(
            Logout::new(&logout.path, &logout.target)
                .with_invalidate_session(logout.invalidate_session)
                .with_remember_me(remember_me.clone()),
        );
        if logout.clear_csrf {
            firewall = firewall.with_csrf_token_ids(csrf_token_ids);
        }
    }

    Ok(firewall)
}

fn remember_me_handler(
    firewall: &str,
    config: &RememberMeConfig,
    collaborators: &Collaborators,
) -> Result<RememberMeHandler, ConfigurationError> {
    let options = RememberMeOptions {
        name: config.name.clone(),
        lifetime: Duration::from_secs(config.lifetime_secs),
        path: config.path.clone(),
        domain: config.domain.clone(),
        secure: config.secure,
        http_only: config.http_only,
        same_site: config.same_site,
        parameter: config.parameter.clone(),
        always_remember_me: config.always_remember_me,
    };
    let users = collaborators.users()?;
    let clock = Arc::clone(&collaborators.clock);

    match config.strategy {
        RememberMeStrategy::Persistent => {
            let tokens = collaborators
                .token_provider
                .clone()
                .ok_or(ConfigurationError::MissingCollaborator("remember-me token provider"))?;
            Ok(RememberMeHandler::Persistent(PersistentRememberMe::new(options, tokens, users, clock)))
        }
        RememberMeStrategy::Signature => {
            let secret = config
                .secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ConfigurationError::Firewall {
                    firewall: firewall.to_string(),
                    message: "the signature remember-me strategy requires a secret".to_string(),
                })?;
            Ok(RememberMeHandler::Signature(SignatureRememberMe::new(
                options,
                secret.as_bytes().to_vec(),
                users,
                clock,
            )))
        }
    }
}

fn login_limiter(
    firewall: &str,
    config: &LoginThrottlingConfig,
    collaborators: &Collaborators,
) -> Result<LoginRateLimiter, ConfigurationError> {
    let store = collaborators
        .rate_limit_store
        .clone()
        .ok_or(ConfigurationError::MissingCollaborator("rate limit store"))?;
    let interval = Duration::from_secs(config.interval_secs);
    Ok(LoginRateLimiter::new(
        format!("login_throttling.{firewall}"),
        store,
        LimiterSpec::new(config.policy, config.max_attempts, interval),
        LimiterSpec::new(config.policy, config.effective_global_max_attempts(), interval),
        Arc::clone(&collaborators.clock),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;
    use crate::http::request::SecurityRequest;

    const CONFIG: &str = r#"
[[firewalls]]
name = "api"
pattern = "/api/*"
stateless = true

[[firewalls.authenticators]]
type = "http_basic"
realm = "API"

[[firewalls]]
name = "main"

[[firewalls.authenticators]]
type = "form_login"

[firewalls.remember_me]
strategy = "signature"
secret = "s3cr3t"

[firewalls.login_throttling]
max_attempts = 3

[firewalls.logout]

[[access_control]]
path = "/admin/*"
attributes = ["ROLE_ADMIN"]
requires_channel = "https"

[[users]]
identifier = "alice"
password = "wonderland"
roles = ["ROLE_USER"]
"#;

    #[test]
    fn test_build_from_config() {
        let config = parse_config(CONFIG).unwrap();
        let map = FirewallMap::from_config(&config, &Collaborators::in_memory(&config.users)).unwrap();

        let api = map.firewall("api").unwrap();
        assert!(api.is_stateless());
        assert_eq!(api.authenticators()[0].name(), "http_basic");

        let main = map.firewall("main").unwrap();
        assert_eq!(main.remember_me().unwrap().strategy(), "signature");
        assert!(main.throttling().is_some());
        assert_eq!(main.logout().unwrap().path(), "/logout");
        assert_eq!(main.csrf_token_ids(), ["authenticate".to_string()]);

        let rule = map.access_map().resolve(&SecurityRequest::get("/admin/users")).unwrap();
        assert_eq!(rule.channel(), Some(Channel::Https));
        assert_eq!(map.context_for(&SecurityRequest::get("/api/x")).unwrap().firewall().name(), "api");
    }

    #[test]
    fn test_missing_collaborators() {
        let config = parse_config(CONFIG).unwrap();
        let err = FirewallMap::from_config(&config, &Collaborators::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingCollaborator("user provider")));

        let partial = Collaborators {
            rate_limit_store: None,
            ..Collaborators::in_memory(&config.users)
        };
        let err = FirewallMap::from_config(&config, &partial).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingCollaborator("rate limit store")));
    }

    #[test]
    fn test_disabled_users_are_kept_disabled() {
        let users = users_from_config(&[UserConfig {
            identifier: "bob".into(),
            password: "pw".into(),
            roles: vec![],
            enabled: false,
        }]);
        assert!(!users.load_user_by_identifier("bob").unwrap().enabled);
    }
}
