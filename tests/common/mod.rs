//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use axum::http::header;
use axum::response::Response;
use std::sync::Arc;

use gatehouse::config::{parse_config, GatehouseConfig};
use gatehouse::http::cookie::Cookie;
use gatehouse::security::clock::MockClock;
use gatehouse::security::firewall::{Collaborators, DispatchOutcome, FirewallDispatcher, FirewallMap};
use gatehouse::security::session::{MemorySessionStore, Session};

pub const START: u64 = 1_700_000_000;

pub const CONFIG: &str = r#"
[[firewalls]]
name = "api"
pattern = "/api/*"
stateless = true

[[firewalls.authenticators]]
type = "http_basic"
realm = "API"

[firewalls.login_throttling]
max_attempts = 3
interval_secs = 60

[[firewalls]]
name = "main"

[[firewalls.authenticators]]
type = "form_login"
enable_csrf = false

[firewalls.remember_me]
strategy = "persistent"
lifetime_secs = 3600

[firewalls.login_throttling]
max_attempts = 3
interval_secs = 60

[firewalls.logout]

[[access_control]]
path = "/login"
attributes = ["PUBLIC_ACCESS"]

[[access_control]]
path = "/secure/*"
attributes = ["PUBLIC_ACCESS"]
requires_channel = "https"

[[access_control]]
path = "/admin*"
attributes = ["ROLE_ADMIN"]

[[access_control]]
path = "/settings"
attributes = ["IS_AUTHENTICATED_FULLY"]

[[access_control]]
path = "/profile"
attributes = ["ROLE_USER"]

[[access_control]]
path = "/api/admin"
attributes = ["ROLE_ADMIN"]

[[access_control]]
path = "/api/*"
attributes = ["IS_AUTHENTICATED_FULLY"]

[access_decision.role_hierarchy]
ROLE_ADMIN = ["ROLE_USER"]

[[users]]
identifier = "alice"
password = "wonderland"
roles = ["ROLE_USER"]

[[users]]
identifier = "root"
password = "toor"
roles = ["ROLE_ADMIN"]

[[users]]
identifier = "mallory"
password = "hunter2"
roles = ["ROLE_USER"]
enabled = false
"#;

/// Dispatcher over `CONFIG` with a controllable clock, plus a session store.
pub struct Harness {
    pub config: GatehouseConfig,
    pub dispatcher: FirewallDispatcher,
    pub sessions: MemorySessionStore,
    pub clock: Arc<MockClock>,
}

impl Harness {
    pub fn new() -> Self {
        let config = parse_config(CONFIG).expect("test config is valid");
        let clock = Arc::new(MockClock::new(START));
        let collaborators = Collaborators::in_memory(&config.users).with_clock(clock.clone());
        let map = FirewallMap::from_config(&config, &collaborators).expect("firewalls build");
        Self {
            config,
            dispatcher: FirewallDispatcher::new(Arc::new(map)),
            sessions: MemorySessionStore::new(),
            clock,
        }
    }

    pub fn fresh_session(&self) -> Arc<dyn Session> {
        self.sessions.open(None)
    }
}

pub fn location(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
}

pub fn cookie<'a>(outcome: &'a DispatchOutcome, name: &str) -> Option<&'a Cookie> {
    outcome.cookies.get(name)
}

pub fn response(outcome: &DispatchOutcome) -> &Response {
    outcome.response.as_ref().expect("terminal response")
}
