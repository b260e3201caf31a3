//! Firewalls: per-request orchestration of the security listeners.
//!
//! # Data Flow
//! ```text
//! SecurityRequest
//!     → FirewallMap::context_for (first matching firewall + first access rule)
//!     → FirewallContext (fresh per request, owns nothing mutable)
//!     → dispatcher.rs runs the ordered listener list over an Exchange
//!          Continue ──► next listener
//!          Respond  ──► stop, send response
//!          Fail     ──► exception.rs turns the error into a response
//!     → DispatchOutcome (state, response, token, cookies)
//! ```
//!
//! # Design Decisions
//! - No global listener registry: the list is derived from the context
//! - Firewalls are immutable after construction and shared via `Arc`
//! - A config reload builds a new `FirewallMap`; requests in flight keep the old one

pub mod dispatcher;
pub mod exception;
pub mod factory;
pub mod listener;

use axum::response::Response;
use std::fmt;
use std::sync::Arc;

use crate::http::cookie::CookieJar;
use crate::http::request::SecurityRequest;
use crate::security::access_decision::AccessDecisionManager;
use crate::security::access_map::{AccessMap, AccessRule};
use crate::security::authenticator::Authenticator;
use crate::security::error::ConfigurationError;
use crate::security::logout::Logout;
use crate::security::matcher::RequestMatcher;
use crate::security::rate_limit::{LoginRateLimiter, ThrottleKeys};
use crate::security::remember_me::RememberMeHandler;
use crate::security::session::Session;
use crate::security::token_storage::TokenStorage;

pub use dispatcher::{DispatchOutcome, FirewallDispatcher};
pub use factory::Collaborators;
pub use listener::{Listener, ListenerOutcome};

/// Where a request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallState {
    /// No firewall matched.
    Unmatched,
    /// Listeners are running.
    Evaluating,
    /// Handler runs with a token installed.
    Authenticated,
    /// Terminal error response (401/403/429).
    Denied,
    /// Terminal redirect.
    Redirected,
    /// Handler runs anonymously.
    PassThrough,
}

impl FirewallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirewallState::Unmatched => "unmatched",
            FirewallState::Evaluating => "evaluating",
            FirewallState::Authenticated => "authenticated",
            FirewallState::Denied => "denied",
            FirewallState::Redirected => "redirected",
            FirewallState::PassThrough => "pass_through",
        }
    }
}

impl fmt::Display for FirewallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured firewall.
#[derive(Debug)]
pub struct Firewall {
    name: String,
    matcher: Box<dyn RequestMatcher>,
    stateless: bool,
    authenticators: Vec<Arc<dyn Authenticator>>,
    remember_me: Option<Arc<RememberMeHandler>>,
    throttling: Option<LoginRateLimiter>,
    logout: Option<Logout>,
    csrf_token_ids: Vec<String>,
}

impl Firewall {
    pub fn new(name: impl Into<String>, matcher: Box<dyn RequestMatcher>) -> Self {
        Self {
            name: name.into(),
            matcher,
            stateless: false,
            authenticators: Vec::new(),
            remember_me: None,
            throttling: None,
            logout: None,
            csrf_token_ids: Vec::new(),
        }
    }

    pub fn with_stateless(mut self, stateless: bool) -> Self {
        self.stateless = stateless;
        self
    }

    /// Authenticators run in the order they are added.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    pub fn with_remember_me(mut self, handler: Arc<RememberMeHandler>) -> Self {
        self.remember_me = Some(handler);
        self
    }

    pub fn with_login_throttling(mut self, limiter: LoginRateLimiter) -> Self {
        self.throttling = Some(limiter);
        self
    }

    pub fn with_logout(mut self, logout: Logout) -> Self {
        self.logout = Some(logout);
        self
    }

    /// CSRF token ids cleared on logout.
    pub fn with_csrf_token_ids(mut self, ids: Vec<String>) -> Self {
        self.csrf_token_ids = ids;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, request: &SecurityRequest) -> bool {
        self.matcher.matches(request)
    }

    pub fn is_stateless(&self) -> bool {
        self.stateless
    }

    pub fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.authenticators
    }

    pub fn remember_me(&self) -> Option<&Arc<RememberMeHandler>> {
        self.remember_me.as_ref()
    }

    pub fn throttling(&self) -> Option<&LoginRateLimiter> {
        self.throttling.as_ref()
    }

    pub fn logout(&self) -> Option<&Logout> {
        self.logout.as_ref()
    }

    pub fn csrf_token_ids(&self) -> &[String] {
        &self.csrf_token_ids
    }
}

/// Firewalls and access rules of one configuration generation.
#[derive(Debug)]
pub struct FirewallMap {
    firewalls: Vec<Arc<Firewall>>,
    access_map: AccessMap,
    decision: Arc<AccessDecisionManager>,
}

impl FirewallMap {
    pub fn new(access_map: AccessMap, decision: AccessDecisionManager) -> Self {
        Self {
            firewalls: Vec::new(),
            access_map,
            decision: Arc::new(decision),
        }
    }

    /// Register a firewall. Firewalls are matched in registration order.
    pub fn add(&mut self, firewall: Firewall) -> Result<(), ConfigurationError> {
        if self.firewalls.iter().any(|f| f.name == firewall.name) {
            return Err(ConfigurationError::DuplicateFirewall(firewall.name));
        }
        self.firewalls.push(Arc::new(firewall));
        Ok(())
    }

    pub fn firewall(&self, name: &str) -> Option<&Arc<Firewall>> {
        self.firewalls.iter().find(|f| f.name == name)
    }

    pub fn access_map(&self) -> &AccessMap {
        &self.access_map
    }

    /// Resolve the firewall and access rule for `request`.
    pub fn context_for(&self, request: &SecurityRequest) -> Option<FirewallContext> {
        let firewall = self.firewalls.iter().find(|f| f.matches(request))?;
        Some(FirewallContext {
            firewall: Arc::clone(firewall),
            rule: self.access_map.resolve(request),
            decision: Arc::clone(&self.decision),
        })
    }
}

/// Everything resolved for one request.
#[derive(Debug, Clone)]
pub struct FirewallContext {
    firewall: Arc<Firewall>,
    rule: Option<Arc<AccessRule>>,
    decision: Arc<AccessDecisionManager>,
}

impl FirewallContext {
    pub fn firewall(&self) -> &Arc<Firewall> {
        &self.firewall
    }

    pub fn rule(&self) -> Option<&Arc<AccessRule>> {
        self.rule.as_ref()
    }

    pub fn decision(&self) -> &AccessDecisionManager {
        &self.decision
    }

    pub fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        self.firewall.authenticators()
    }

    /// The first authenticator accepting this request's credentials.
    pub fn supporting_authenticator(&self, request: &SecurityRequest) -> Option<&Arc<dyn Authenticator>> {
        self.firewall
            .authenticators()
            .iter()
            .find(|a| a.supports(request))
    }

    pub fn login_path(&self) -> Option<&str> {
        self.firewall
            .authenticators()
            .iter()
            .find_map(|a| a.login_path())
    }

    pub fn logout_path(&self) -> Option<&str> {
        self.firewall.logout().map(Logout::path)
    }

    pub fn is_logout_request(&self, request: &SecurityRequest) -> bool {
        self.logout_path() == Some(request.path())
    }

    /// A request that needs no listener at all: public or unprotected path,
    /// no remember-me cookie, no credentials, not the logout path.
    pub fn is_lazy(&self, request: &SecurityRequest) -> bool {
        let rule_needs_nothing = self
            .rule
            .as_ref()
            .map_or(true, |rule| rule.is_public() && rule.channel().is_none());
        let has_remember_me_cookie = self
            .firewall
            .remember_me()
            .is_some_and(|rm| request.cookie(rm.cookie_name()).is_some());

        rule_needs_nothing
            && !has_remember_me_cookie
            && self.supporting_authenticator(request).is_none()
            && !self.is_logout_request(request)
    }

    /// Ordered listener list for `request`.
    pub fn listeners(&self, request: &SecurityRequest) -> Vec<Listener> {
        let mut listeners = Vec::with_capacity(6);
        if self.rule.as_ref().is_some_and(|r| r.channel().is_some()) {
            listeners.push(Listener::Channel);
        }
        if self.firewall.throttling().is_some() {
            listeners.push(Listener::LoginThrottling);
        }
        if !self.firewall.authenticators().is_empty() {
            listeners.push(Listener::Authenticators);
        }
        if self.firewall.remember_me().is_some() {
            listeners.push(Listener::RememberMe);
        }
        listeners.push(Listener::Access);
        if self.is_logout_request(request) {
            listeners.push(Listener::Logout);
        }
        listeners
    }
}

/// Mutable per-request state the listeners work on.
#[derive(Debug)]
pub struct Exchange {
    pub request: SecurityRequest,
    pub context: FirewallContext,
    pub token_storage: TokenStorage,
    pub session: Option<Arc<dyn Session>>,
    pub cookies: CookieJar,
    /// Throttle buckets charged for this login attempt.
    pub throttle_keys: Option<ThrottleKeys>,
    /// An authenticator installed a token during this request.
    pub authenticated_now: bool,
    /// Success response held back until access has been granted.
    pub deferred_response: Option<Response>,
}

impl Exchange {
    pub fn new(
        request: SecurityRequest,
        context: FirewallContext,
        token_storage: TokenStorage,
        session: Option<Arc<dyn Session>>,
    ) -> Self {
        Self {
            request,
            context,
            token_storage,
            session,
            cookies: CookieJar::default(),
            throttle_keys: None,
            authenticated_now: false,
            deferred_response: None,
        }
    }

    pub fn firewall_name(&self) -> &str {
        self.context.firewall().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Channel;
    use crate::security::access_map::PUBLIC_ACCESS;
    use crate::security::authenticator::HttpBasicAuthenticator;
    use crate::security::matcher::{AndMatcher, PathMatcher};
    use crate::security::user::{InMemoryUserProvider, PlaintextPasswordVerifier};

    fn rule(path: &str, attrs: &[&str], channel: Option<Channel>) -> AccessRule {
        AccessRule::new(
            Box::new(PathMatcher::new(path).unwrap()),
            attrs.iter().map(|a| a.to_string()).collect(),
            channel,
        )
    }

    fn map() -> FirewallMap {
        let mut access = AccessMap::new();
        access.add(rule("/secure/*", &["ROLE_USER"], Some(Channel::Https)));
        access.add(rule("/*", &[PUBLIC_ACCESS], None));

        let mut map = FirewallMap::new(access, AccessDecisionManager::default());
        let api = Firewall::new("api", Box::new(PathMatcher::new("/api/*").unwrap()))
            .with_stateless(true)
            .with_authenticator(Arc::new(HttpBasicAuthenticator::new(
                "api",
                Arc::new(InMemoryUserProvider::new([])),
                Arc::new(PlaintextPasswordVerifier),
            )))
            .with_logout(Logout::new("/api/logout", "/"));
        map.add(api).unwrap();
        map.add(Firewall::new("main", Box::new(AndMatcher::default()))).unwrap();
        map
    }

    #[test]
    fn test_first_matching_firewall_wins() {
        let map = map();
        let context = map.context_for(&SecurityRequest::get("/api/users")).unwrap();
        assert_eq!(context.firewall().name(), "api");
        let context = map.context_for(&SecurityRequest::get("/home")).unwrap();
        assert_eq!(context.firewall().name(), "main");
    }

    #[test]
    fn test_duplicate_firewall_is_rejected() {
        let mut map = map();
        let err = map
            .add(Firewall::new("main", Box::new(AndMatcher::default())))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateFirewall(name) if name == "main"));
    }

    #[test]
    fn test_listener_order() {
        let map = map();
        let request = SecurityRequest::get("/api/logout");
        let context = map.context_for(&request).unwrap();
        assert_eq!(
            context.listeners(&request),
            vec![Listener::Authenticators, Listener::Access, Listener::Logout]
        );

        let request = SecurityRequest::get("/secure/page");
        let context = map.context_for(&request).unwrap();
        assert_eq!(context.listeners(&request), vec![Listener::Channel, Listener::Access]);
    }

    #[test]
    fn test_lazy_requests() {
        let map = map();
        let public = SecurityRequest::get("/api/docs");
        assert!(map.context_for(&public).unwrap().is_lazy(&public));

        let with_credentials = public.clone().with_header("authorization", "Basic eDp5");
        assert!(!map.context_for(&with_credentials).unwrap().is_lazy(&with_credentials));

        let logout = SecurityRequest::get("/api/logout");
        assert!(!map.context_for(&logout).unwrap().is_lazy(&logout));

        let secure = SecurityRequest::get("/secure/x");
        assert!(!map.context_for(&secure).unwrap().is_lazy(&secure));
    }
}
