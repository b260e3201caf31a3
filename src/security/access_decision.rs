//! Access decisions: voters and decision strategies.
//!
//! # Data Flow
//! ```text
//! decide(token, attributes, subject)
//!     │
//!     ├─ all attributes PUBLIC_ACCESS? ──► grant (voters not consulted)
//!     │
//!     └─ token (None / unauthenticated ⇒ anonymous)
//!            ──► each voter votes ──► strategy tallies ──► grant / deny
//! ```
//!
//! # Design Decisions
//! - Anonymous identities hold no authorities, so every voter abstains or
//!   denies for anything but `PUBLIC_ACCESS`
//! - All-abstain denies unless `allow_if_all_abstain` is set

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;

use crate::security::access_map::PUBLIC_ACCESS;
use crate::security::token::AuthenticationToken;

pub const IS_AUTHENTICATED_FULLY: &str = "IS_AUTHENTICATED_FULLY";
pub const IS_AUTHENTICATED_REMEMBERED: &str = "IS_AUTHENTICATED_REMEMBERED";
pub const IS_AUTHENTICATED: &str = "IS_AUTHENTICATED";
pub const IS_REMEMBERED: &str = "IS_REMEMBERED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Granted,
    Abstain,
    Denied,
}

/// One unit of the access decision.
pub trait Voter: Send + Sync + Debug {
    /// Vote on `attributes` for `subject`. `token` is `None` for anonymous.
    fn vote(&self, token: Option<&AuthenticationToken>, attributes: &[String], subject: &str) -> Vote;
}

/// Expands roles through a parent → children hierarchy.
#[derive(Debug, Clone, Default)]
pub struct RoleHierarchy {
    children: HashMap<String, Vec<String>>,
}

impl RoleHierarchy {
    pub fn new(children: HashMap<String, Vec<String>>) -> Self {
        Self { children }
    }

    /// All roles reachable from `roles`, including themselves.
    pub fn reachable<'a>(&self, roles: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        let mut pending: Vec<String> = roles.into_iter().cloned().collect();
        while let Some(role) = pending.pop() {
            if reached.insert(role.clone()) {
                if let Some(children) = self.children.get(&role) {
                    pending.extend(children.iter().cloned());
                }
            }
        }
        reached
    }
}

/// Votes on attributes starting with `ROLE_`.
#[derive(Debug, Clone, Default)]
pub struct RoleVoter {
    hierarchy: RoleHierarchy,
}

impl RoleVoter {
    pub const PREFIX: &'static str = "ROLE_";

    pub fn new(hierarchy: RoleHierarchy) -> Self {
        Self { hierarchy }
    }
}

impl Voter for RoleVoter {
    fn vote(&self, token: Option<&AuthenticationToken>, attributes: &[String], _subject: &str) -> Vote {
        let roles = token
            .map(|t| self.hierarchy.reachable(t.roles()))
            .unwrap_or_default();

        let mut vote = Vote::Abstain;
        for attribute in attributes.iter().filter(|a| a.starts_with(Self::PREFIX)) {
            if roles.contains(attribute) {
                return Vote::Granted;
            }
            vote = Vote::Denied;
        }
        vote
    }
}

/// Votes on the `IS_AUTHENTICATED*` / `IS_REMEMBERED` attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticatedVoter;

impl Voter for AuthenticatedVoter {
    fn vote(&self, token: Option<&AuthenticationToken>, attributes: &[String], _subject: &str) -> Vote {
        let mut vote = Vote::Abstain;
        for attribute in attributes {
            let granted = match attribute.as_str() {
                IS_AUTHENTICATED_FULLY => token.is_some_and(AuthenticationToken::is_fully_authenticated),
                IS_AUTHENTICATED_REMEMBERED | IS_AUTHENTICATED => {
                    token.is_some_and(AuthenticationToken::is_authenticated)
                }
                IS_REMEMBERED => token.is_some_and(AuthenticationToken::is_remembered),
                _ => continue,
            };
            if granted {
                return Vote::Granted;
            }
            vote = Vote::Denied;
        }
        vote
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStrategy {
    /// Grant if any voter grants.
    #[default]
    Affirmative,
    /// Grant if more voters grant than deny; ties follow `allow_if_equal`.
    Consensus,
    /// Grant only if no voter denies and at least one grants.
    Unanimous,
}

/// Combines voters under a strategy.
#[derive(Debug)]
pub struct AccessDecisionManager {
    voters: Vec<Box<dyn Voter>>,
    strategy: DecisionStrategy,
    allow_if_all_abstain: bool,
    allow_if_equal: bool,
}

impl AccessDecisionManager {
    pub fn new(voters: Vec<Box<dyn Voter>>, strategy: DecisionStrategy) -> Self {
        Self {
            voters,
            strategy,
            allow_if_all_abstain: false,
            allow_if_equal: true,
        }
    }

    pub fn with_allow_if_all_abstain(mut self, allow: bool) -> Self {
        self.allow_if_all_abstain = allow;
        self
    }

    pub fn with_allow_if_equal(mut self, allow: bool) -> Self {
        self.allow_if_equal = allow;
        self
    }

    /// Decide whether `token` may access `subject` requiring `attributes`.
    pub fn decide(&self, token: Option<&AuthenticationToken>, attributes: &[String], subject: &str) -> bool {
        if !attributes.is_empty() && attributes.iter().all(|a| a == PUBLIC_ACCESS) {
            return true;
        }
        let attributes: Vec<String> = attributes
            .iter()
            .filter(|a| *a != PUBLIC_ACCESS)
            .cloned()
            .collect();
        let token = token.filter(|t| t.is_authenticated());

        let (mut granted, mut denied) = (0usize, 0usize);
        for voter in &self.voters {
            match voter.vote(token, &attributes, subject) {
                Vote::Granted => {
                    granted += 1;
                    if self.strategy == DecisionStrategy::Affirmative {
                        return true;
                    }
                }
                Vote::Denied => {
                    denied += 1;
                    if self.strategy == DecisionStrategy::Unanimous {
                        return false;
                    }
                }
                Vote::Abstain => {}
            }
        }

        if granted == 0 && denied == 0 {
            return self.allow_if_all_abstain;
        }
        match self.strategy {
            DecisionStrategy::Affirmative => false,
            DecisionStrategy::Unanimous => granted > 0,
            DecisionStrategy::Consensus => {
                granted > denied || (granted == denied && self.allow_if_equal)
            }
        }
    }
}

impl Default for AccessDecisionManager {
    fn default() -> Self {
        Self::new(
            vec![Box::new(RoleVoter::default()), Box::new(AuthenticatedVoter)],
            DecisionStrategy::Affirmative,
        )
    }
}
