//! Session key-value contract and an in-process implementation.
//!
//! # Responsibilities
//! - Namespaced get/set/delete for one client session
//! - Invalidation (drop all data, new id)
//! - Migration (keep data, new id) against session fixation
//! - Idle and absolute expiry of stored sessions
//!
//! # Design Decisions
//! - A `Session` is a per-request handle; the store behind it is shared
//! - All operations return `BackendError` so callers can fail closed
//! - An expired session reads as empty; `open` replaces its id and the
//!   store purges expired entries every `PURGE_EVERY` opens

use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

use crate::config::schema::SessionConfig;
use crate::security::clock::{Clock, SystemClock};
use crate::security::error::BackendError;

const PURGE_EVERY: u64 = 1024;

/// Session store contract for one client session.
pub trait Session: Send + Sync + Debug {
    /// Current session id. Changes after `invalidate` or `migrate`.
    fn id(&self) -> String;

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, BackendError>;

    fn set(&self, namespace: &str, key: &str, value: String) -> Result<(), BackendError>;

    fn delete(&self, namespace: &str, key: &str) -> Result<(), BackendError>;

    /// Drop all data and move to a fresh id.
    fn invalidate(&self) -> Result<(), BackendError>;

    /// Move existing data to a fresh id.
    fn migrate(&self) -> Result<(), BackendError>;
}

/// How long a stored session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Expire after this long without a request.
    pub idle_timeout: Duration,
    /// Expire this long after creation, regardless of activity.
    pub max_lifetime: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            max_lifetime: Duration::from_secs(8 * 60 * 60),
        }
    }
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_lifetime: Duration::from_secs(config.max_lifetime_secs),
        }
    }
}

#[derive(Debug)]
struct StoredSession {
    data: HashMap<String, String>,
    /// Unix seconds.
    created: u64,
    last_access: u64,
}

impl StoredSession {
    fn fresh(now: u64) -> Self {
        Self {
            data: HashMap::new(),
            created: now,
            last_access: now,
        }
    }

    fn is_expired(&self, policy: &SessionPolicy, now: u64) -> bool {
        now.saturating_sub(self.last_access) > policy.idle_timeout.as_secs()
            || now.saturating_sub(self.created) > policy.max_lifetime.as_secs()
    }
}

#[derive(Debug)]
struct StoreInner {
    sessions: DashMap<String, StoredSession>,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
    opens: AtomicU64,
}

impl StoreInner {
    fn now(&self) -> u64 {
        self.clock.unix_now()
    }

    /// Mark `id` as used. Expired sessions are dropped and report `false`.
    fn touch(&self, id: &str, now: u64) -> bool {
        if let Some(mut stored) = self.sessions.get_mut(id) {
            if !stored.is_expired(&self.policy, now) {
                stored.last_access = now;
                return true;
            }
        }
        self.sessions.remove(id);
        false
    }
}

/// Shared in-memory session storage keyed by session id.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    inner: Arc<StoreInner>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_policy(SessionPolicy::default(), Arc::new(SystemClock))
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: SessionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                sessions: DashMap::new(),
                policy,
                clock,
                opens: AtomicU64::new(0),
            }),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.inner.policy
    }

    /// Open the session for `id`, or a fresh one when `id` is unknown or expired.
    ///
    /// Unknown ids are never adopted: a client cannot choose its session id.
    pub fn open(&self, id: Option<&str>) -> Arc<MemorySession> {
        if self.inner.opens.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired();
        }
        let now = self.inner.now();
        let id = match id {
            Some(id) if self.inner.touch(id, now) => id.to_string(),
            _ => new_session_id(),
        };
        Arc::new(MemorySession {
            store: Arc::clone(&self.inner),
            id: RwLock::new(id),
        })
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.now();
        let policy = self.inner.policy;
        let before = self.inner.sessions.len();
        self.inner.sessions.retain(|_, stored| !stored.is_expired(&policy, now));
        let purged = before.saturating_sub(self.inner.sessions.len());
        if purged > 0 {
            tracing::debug!(purged, remaining = self.inner.sessions.len(), "Purged expired sessions");
        }
        purged
    }

    /// Whether a live session with this id currently holds data.
    pub fn contains(&self, id: &str) -> bool {
        let now = self.inner.now();
        self.inner
            .sessions
            .get(id)
            .is_some_and(|stored| !stored.is_expired(&self.inner.policy, now))
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn compose_key(namespace: &str, key: &str) -> String {
    format!("{namespace}/{key}")
}

/// Handle on one session in a [`MemorySessionStore`].
#[derive(Debug)]
pub struct MemorySession {
    store: Arc<StoreInner>,
    id: RwLock<String>,
}

impl MemorySession {
    fn current_id(&self) -> String {
        self.id.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace_id(&self) -> String {
        let fresh = new_session_id();
        let mut guard = self.id.write().unwrap_or_else(|e| e.into_inner());
        *guard = fresh.clone();
        fresh
    }
}

impl Session for MemorySession {
    fn id(&self) -> String {
        self.current_id()
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, BackendError> {
        let id = self.current_id();
        let now = self.store.now();
        Ok(self
            .store
            .sessions
            .get(&id)
            .filter(|stored| !stored.is_expired(&self.store.policy, now))
            .and_then(|stored| stored.data.get(&compose_key(namespace, key)).cloned()))
    }

    fn set(&self, namespace: &str, key: &str, value: String) -> Result<(), BackendError> {
        let id = self.current_id();
        let now = self.store.now();
        let mut stored = self
            .store
            .sessions
            .entry(id)
            .or_insert_with(|| StoredSession::fresh(now));
        if stored.is_expired(&self.store.policy, now) {
            *stored = StoredSession::fresh(now);
        }
        stored.last_access = now;
        stored.data.insert(compose_key(namespace, key), value);
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), BackendError> {
        let id = self.current_id();
        if let Some(mut stored) = self.store.sessions.get_mut(&id) {
            stored.data.remove(&compose_key(namespace, key));
        }
        Ok(())
    }

    fn invalidate(&self) -> Result<(), BackendError> {
        let old = self.current_id();
        self.store.sessions.remove(&old);
        self.replace_id();
        Ok(())
    }

    fn migrate(&self) -> Result<(), BackendError> {
        let old = self.current_id();
        let fresh = self.replace_id();
        if let Some((_, stored)) = self.store.sessions.remove(&old) {
            self.store.sessions.insert(fresh, stored);
        }
        Ok(())
    }
}
