//! Ordered access rules.
//!
//! # Design Decisions
//! - Rules are evaluated in registration order; the first match wins
//! - `PUBLIC_ACCESS` grants without consulting voters
//! - Rules are shared via `Arc` so a per-request context can hold them cheaply

use std::sync::Arc;

use crate::http::request::{Channel, SecurityRequest};
use crate::security::matcher::RequestMatcher;

/// Attribute that always grants access.
pub const PUBLIC_ACCESS: &str = "PUBLIC_ACCESS";

/// One access rule.
#[derive(Debug)]
pub struct AccessRule {
    matcher: Box<dyn RequestMatcher>,
    attributes: Vec<String>,
    channel: Option<Channel>,
}

impl AccessRule {
    pub fn new(matcher: Box<dyn RequestMatcher>, attributes: Vec<String>, channel: Option<Channel>) -> Self {
        Self {
            matcher,
            attributes,
            channel,
        }
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn channel(&self) -> Option<Channel> {
        self.channel
    }

    /// True if the only requirement is `PUBLIC_ACCESS`.
    pub fn is_public(&self) -> bool {
        !self.attributes.is_empty() && self.attributes.iter().all(|a| a == PUBLIC_ACCESS)
    }
}

/// Ordered list of access rules.
#[derive(Debug, Default, Clone)]
pub struct AccessMap {
    rules: Vec<Arc<AccessRule>>,
}

impl AccessMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: AccessRule) {
        self.rules.push(Arc::new(rule));
    }

    /// The first rule matching `request`.
    pub fn resolve(&self, request: &SecurityRequest) -> Option<Arc<AccessRule>> {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(request))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
