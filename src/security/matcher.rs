//! Request matching for access rules and firewalls.
//!
//! # Responsibilities
//! - Match host (exact, case-insensitive)
//! - Match path against a glob or a regular expression (case-sensitive)
//! - Match method
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Patterns starting with `^` are regular expressions used as written
//! - Any other pattern is a glob: `*` matches any run of characters
//!   (including `/`), everything else is literal, and the whole path must match
//! - Patterns are compiled once, at construction

use axum::http::Method;
use regex::Regex;

use crate::http::request::SecurityRequest;
use crate::security::error::ConfigurationError;

/// Trait for matching requests against conditions.
pub trait RequestMatcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &SecurityRequest) -> bool;
}

/// Matches the request host.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl RequestMatcher for HostMatcher {
    fn matches(&self, req: &SecurityRequest) -> bool {
        req.host()
            .map(|h| h.to_lowercase() == self.expected_host)
            .unwrap_or(false)
    }
}

/// Matches the request path against a glob or regex pattern.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    regex: Regex,
}

impl PathMatcher {
    pub fn new(pattern: impl Into<String>) -> Result<Self, ConfigurationError> {
        let pattern = pattern.into();
        let source = if pattern.starts_with('^') {
            pattern.clone()
        } else {
            glob_to_regex(&pattern)
        };
        let regex = Regex::new(&source).map_err(|source| ConfigurationError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        Ok(Self { pattern, regex })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches_path(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn glob_to_regex(glob: &str) -> String {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("^{body}$")
}

impl RequestMatcher for PathMatcher {
    fn matches(&self, req: &SecurityRequest) -> bool {
        self.matches_path(req.path())
    }
}

/// Matches any of a set of methods.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    methods: Vec<Method>,
}

impl MethodMatcher {
    pub fn new(methods: Vec<Method>) -> Self {
        Self { methods }
    }
}

impl RequestMatcher for MethodMatcher {
    fn matches(&self, req: &SecurityRequest) -> bool {
        self.methods.iter().any(|m| m == req.method())
    }
}

/// Combines multiple matchers with AND semantics. Empty matches everything.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn RequestMatcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn RequestMatcher>>) -> Self {
        Self { matchers }
    }

    /// Build from optional path, host and method conditions.
    pub fn from_parts(
        path: Option<&str>,
        host: Option<&str>,
        methods: &[String],
    ) -> Result<Self, ConfigurationError> {
        let mut matchers: Vec<Box<dyn RequestMatcher>> = Vec::new();
        if let Some(path) = path {
            matchers.push(Box::new(PathMatcher::new(path)?));
        }
        if let Some(host) = host {
            matchers.push(Box::new(HostMatcher::new(host)));
        }
        if !methods.is_empty() {
            let methods = methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_uppercase().as_bytes()).map_err(|_| {
                        ConfigurationError::Firewall {
                            firewall: path.unwrap_or("*").to_string(),
                            message: format!("invalid method \"{m}\""),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            matchers.push(Box::new(MethodMatcher::new(methods)));
        }
        Ok(Self::new(matchers))
    }
}

impl RequestMatcher for AndMatcher {
    fn matches(&self, req: &SecurityRequest) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}
