//! Login throttling.
//!
//! # Data Flow
//! ```text
//! login attempt (ip, username?)
//!     → global key  "<id>:global:<ip>"
//!     → local key   "<id>:local:<normalized username>-<ip>"   (username known)
//!     → store.consume(key) per bucket (atomic per key)
//!     → most restrictive result wins
//!
//! fully successful authentication
//!     → store.reset(key) for the same keys
//! ```
//!
//! # Design Decisions
//! - Remaining counts are unsigned and a rejected consume never decrements
//! - `MemoryRateLimitStore` serializes per key through the dashmap shard lock;
//!   it only protects a single process. Multi-instance deployments plug a
//!   shared store in behind `RateLimitStore`
//! - A bucket that has drained back to its fresh state is dropped; the
//!   in-memory store prunes them every `PRUNE_EVERY` consumes

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::security::clock::Clock;
use crate::security::error::BackendError;

const PRUNE_EVERY: u64 = 1024;

/// Throttling algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPolicy {
    /// `limit` attempts per `interval`, counted from the first attempt.
    #[default]
    FixedWindow,
    /// Capacity `limit`, refilled continuously at `limit / interval`.
    TokenBucket,
}

/// Parameters of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSpec {
    pub policy: RateLimitPolicy,
    pub limit: u32,
    pub interval: Duration,
}

impl LimiterSpec {
    pub fn new(policy: RateLimitPolicy, limit: u32, interval: Duration) -> Self {
        Self {
            policy,
            limit,
            interval,
        }
    }
}

/// Outcome of a consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub accepted: bool,
    pub remaining: u32,
    pub limit: u32,
    /// How long until the next attempt could be accepted. Zero when accepted.
    pub retry_after: Duration,
}

/// Shared counter backend.
pub trait RateLimitStore: Send + Sync + Debug {
    /// Atomically take `tokens` from the bucket at `key`.
    fn consume(&self, key: &str, spec: &LimiterSpec, tokens: u32, now: SystemTime) -> Result<RateLimit, BackendError>;

    /// Drop the bucket at `key`.
    fn reset(&self, key: &str) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, Copy)]
enum BucketState {
    Window { remaining: u32, window_reset: SystemTime },
    Bucket {
        tokens: f64,
        last_update: SystemTime,
        /// When the bucket is back at capacity.
        full_at: SystemTime,
    },
}

impl BucketState {
    fn fresh(spec: &LimiterSpec, now: SystemTime) -> Self {
        match spec.policy {
            RateLimitPolicy::FixedWindow => BucketState::Window {
                remaining: spec.limit,
                window_reset: now + spec.interval,
            },
            RateLimitPolicy::TokenBucket => BucketState::Bucket {
                tokens: f64::from(spec.limit),
                last_update: now,
                full_at: now,
            },
        }
    }

    /// Whether a fresh bucket would behave the same from `now` on.
    fn is_stale(&self, now: SystemTime) -> bool {
        match self {
            BucketState::Window { window_reset, .. } => now >= *window_reset,
            BucketState::Bucket { full_at, .. } => now >= *full_at,
        }
    }

    fn try_acquire(&mut self, spec: &LimiterSpec, tokens: u32, now: SystemTime) -> RateLimit {
        match self {
            BucketState::Window { remaining, window_reset } => {
                if now >= *window_reset {
                    *remaining = spec.limit;
                    *window_reset = now + spec.interval;
                }
                if *remaining >= tokens {
                    *remaining -= tokens;
                    RateLimit {
                        accepted: true,
                        remaining: *remaining,
                        limit: spec.limit,
                        retry_after: Duration::ZERO,
                    }
                } else {
                    RateLimit {
                        accepted: false,
                        remaining: *remaining,
                        limit: spec.limit,
                        retry_after: window_reset.duration_since(now).unwrap_or_default(),
                    }
                }
            }
            BucketState::Bucket {
                tokens: available,
                last_update,
                full_at,
            } => {
                let capacity = f64::from(spec.limit);
                let refill_rate = capacity / spec.interval.as_secs_f64().max(f64::EPSILON);
                let elapsed = now.duration_since(*last_update).unwrap_or_default().as_secs_f64();

                *available = (*available + elapsed * refill_rate).min(capacity);
                *last_update = now;

                let wanted = f64::from(tokens);
                if *available >= wanted {
                    *available -= wanted;
                    let refill = (capacity - *available) / refill_rate.max(f64::EPSILON);
                    *full_at = now + Duration::try_from_secs_f64(refill).unwrap_or(spec.interval);
                    RateLimit {
                        accepted: true,
                        remaining: available.floor() as u32,
                        limit: spec.limit,
                        retry_after: Duration::ZERO,
                    }
                } else {
                    let missing = wanted - *available;
                    let retry_after = if refill_rate > 0.0 {
                        Duration::try_from_secs_f64(missing / refill_rate).unwrap_or(spec.interval)
                    } else {
                        spec.interval
                    };
                    RateLimit {
                        accepted: false,
                        remaining: available.floor() as u32,
                        limit: spec.limit,
                        retry_after,
                    }
                }
            }
        }
    }

    fn matches(&self, policy: RateLimitPolicy) -> bool {
        matches!(
            (self, policy),
            (BucketState::Window { .. }, RateLimitPolicy::FixedWindow)
                | (BucketState::Bucket { .. }, RateLimitPolicy::TokenBucket)
        )
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    buckets: DashMap<String, BucketState>,
    consumes: AtomicU64,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every bucket that has drained back to its fresh state.
    pub fn prune(&self, now: SystemTime) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, state| !state.is_stale(now));
        let pruned = before.saturating_sub(self.buckets.len());
        if pruned > 0 {
            tracing::debug!(pruned, remaining = self.buckets.len(), "Pruned throttle buckets");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn consume(&self, key: &str, spec: &LimiterSpec, tokens: u32, now: SystemTime) -> Result<RateLimit, BackendError> {
        // Before taking the entry guard: retain locks every shard.
        if self.consumes.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(now);
        }

        // The entry guard holds the shard lock for the read-modify-write.
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| BucketState::fresh(spec, now));
        if !entry.matches(spec.policy) {
            *entry = BucketState::fresh(spec, now);
        }
        Ok(entry.try_acquire(spec, tokens, now))
    }

    fn reset(&self, key: &str) -> Result<(), BackendError> {
        self.buckets.remove(key);
        Ok(())
    }
}

/// Lowercase a submitted username. Unicode-aware when the input is UTF-8,
/// byte-wise ASCII otherwise.
pub fn normalize_username(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_lowercase(),
        Err(_) => String::from_utf8_lossy(&raw.to_ascii_lowercase()).into_owned(),
    }
}

/// Bucket keys resolved for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleKeys {
    pub global: String,
    pub local: Option<String>,
}

/// Composite limiter keyed by IP and by (username, IP).
#[derive(Debug, Clone)]
pub struct LoginRateLimiter {
    id: String,
    store: Arc<dyn RateLimitStore>,
    local: LimiterSpec,
    global: LimiterSpec,
    clock: Arc<dyn Clock>,
}

impl LoginRateLimiter {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn RateLimitStore>,
        local: LimiterSpec,
        global: LimiterSpec,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            local,
            global,
            clock,
        }
    }

    pub fn keys(&self, client_ip: IpAddr, username: Option<&[u8]>) -> ThrottleKeys {
        ThrottleKeys {
            global: format!("{}:global:{}", self.id, client_ip),
            local: username
                .filter(|u| !u.is_empty())
                .map(|u| format!("{}:local:{}-{}", self.id, normalize_username(u), client_ip)),
        }
    }

    /// Consume one attempt from every bucket; the most restrictive result wins.
    pub fn consume(&self, keys: &ThrottleKeys) -> Result<RateLimit, BackendError> {
        let now = self.clock.now();
        let mut results = vec![self.store.consume(&keys.global, &self.global, 1, now)?];
        if let Some(local) = &keys.local {
            results.push(self.store.consume(local, &self.local, 1, now)?);
        }
        Ok(most_restrictive(results))
    }

    /// Clear every bucket for `keys`.
    pub fn reset(&self, keys: &ThrottleKeys) -> Result<(), BackendError> {
        self.store.reset(&keys.global)?;
        if let Some(local) = &keys.local {
            self.store.reset(local)?;
        }
        Ok(())
    }
}

fn most_restrictive(results: Vec<RateLimit>) -> RateLimit {
    results
        .into_iter()
        .min_by(|a, b| {
            a.accepted
                .cmp(&b.accepted)
                .then(a.remaining.cmp(&b.remaining))
                .then(b.retry_after.cmp(&a.retry_after))
        })
        .unwrap_or(RateLimit {
            accepted: true,
            remaining: 0,
            limit: 0,
            retry_after: Duration::ZERO,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::MockClock;

    fn limiter(store: Arc<MemoryRateLimitStore>, clock: Arc<MockClock>, local: u32) -> LoginRateLimiter {
        let interval = Duration::from_secs(60);
        LoginRateLimiter::new(
            "main",
            store,
            LimiterSpec::new(RateLimitPolicy::FixedWindow, local, interval),
            LimiterSpec::new(RateLimitPolicy::FixedWindow, local * 5, interval),
            clock,
        )
    }

    fn ip() -> IpAddr {
        "192.0.2.7".parse().unwrap()
    }

    #[test]
    fn test_local_bucket_exhausts_then_resets() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let clock = Arc::new(MockClock::new(1_000));
        let limiter = limiter(store, clock, 3);
        let keys = limiter.keys(ip(), Some(b"Alice".as_slice()));

        for expected in [2, 1, 0] {
            let result = limiter.consume(&keys).unwrap();
            assert!(result.accepted);
            assert_eq!(result.remaining, expected);
        }
        let rejected = limiter.consume(&keys).unwrap();
        assert!(!rejected.accepted);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.retry_after, Duration::from_secs(60));

        limiter.reset(&keys).unwrap();
        let fresh = limiter.consume(&keys).unwrap();
        assert!(fresh.accepted);
        assert_eq!(fresh.remaining, 2);
    }

    #[test]
    fn test_window_expires() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let clock = Arc::new(MockClock::new(1_000));
        let limiter = limiter(store, clock.clone(), 1);
        let keys = limiter.keys(ip(), Some(b"bob".as_slice()));

        assert!(limiter.consume(&keys).unwrap().accepted);
        assert!(!limiter.consume(&keys).unwrap().accepted);
        clock.advance(Duration::from_secs(61));
        assert!(limiter.consume(&keys).unwrap().accepted);
    }

    #[test]
    fn test_global_bucket_counts_all_usernames() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let clock = Arc::new(MockClock::new(1_000));
        let limiter = limiter(store, clock, 1);

        // Global limit is 5; each attempt uses a fresh username.
        for i in 0..5 {
            let keys = limiter.keys(ip(), Some(format!("user{i}").as_bytes()));
            assert!(limiter.consume(&keys).unwrap().accepted);
        }
        let keys = limiter.keys(ip(), Some(b"user-new".as_slice()));
        assert!(!limiter.consume(&keys).unwrap().accepted);
    }

    #[test]
    fn test_keys_normalize_username() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = limiter(store, Arc::new(MockClock::new(0)), 5);
        assert_eq!(
            limiter.keys(ip(), Some("ÉLODIE".as_bytes())).local.as_deref(),
            Some("main:local:élodie-192.0.2.7")
        );
        assert_eq!(limiter.keys(ip(), None).local, None);
        assert_eq!(limiter.keys(ip(), None).global, "main:global:192.0.2.7");
    }

    #[test]
    fn test_normalize_invalid_utf8() {
        assert_eq!(normalize_username(b"ABC\xff"), "abc\u{fffd}");
        assert_eq!(normalize_username("ÀB".as_bytes()), "àb");
    }

    #[test]
    fn test_token_bucket_refills() {
        let store = MemoryRateLimitStore::new();
        let spec = LimiterSpec::new(RateLimitPolicy::TokenBucket, 2, Duration::from_secs(10));
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(100);

        assert!(store.consume("k", &spec, 1, start).unwrap().accepted);
        assert!(store.consume("k", &spec, 1, start).unwrap().accepted);
        let rejected = store.consume("k", &spec, 1, start).unwrap();
        assert!(!rejected.accepted);
        let retry_ms = rejected.retry_after.as_millis();
        assert!((4_999..=5_001).contains(&retry_ms), "retry after {retry_ms}ms");

        let later = start + Duration::from_secs(5);
        assert!(store.consume("k", &spec, 1, later).unwrap().accepted);
    }

    #[test]
    fn test_prune_drops_drained_buckets() {
        let store = MemoryRateLimitStore::new();
        let window = LimiterSpec::new(RateLimitPolicy::FixedWindow, 3, Duration::from_secs(60));
        let bucket = LimiterSpec::new(RateLimitPolicy::TokenBucket, 2, Duration::from_secs(10));
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(100);

        store.consume("window", &window, 1, start).unwrap();
        store.consume("bucket", &bucket, 2, start).unwrap();
        assert_eq!(store.prune(start + Duration::from_secs(5)), 0);

        // The bucket refills after 10s, the window only resets after 60s.
        assert_eq!(store.prune(start + Duration::from_secs(11)), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.prune(start + Duration::from_secs(60)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_consume_prunes_periodically() {
        let store = MemoryRateLimitStore::new();
        let spec = LimiterSpec::new(RateLimitPolicy::FixedWindow, 3, Duration::from_secs(60));
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(100);

        for i in 0..PRUNE_EVERY - 1 {
            store.consume(&format!("user{i}"), &spec, 1, start).unwrap();
        }
        assert_eq!(store.len(), (PRUNE_EVERY - 1) as usize);

        store.consume("late", &spec, 1, start + Duration::from_secs(61)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_most_restrictive_prefers_rejection() {
        let accepted = RateLimit {
            accepted: true,
            remaining: 0,
            limit: 5,
            retry_after: Duration::ZERO,
        };
        let rejected = RateLimit {
            accepted: false,
            remaining: 3,
            limit: 25,
            retry_after: Duration::from_secs(9),
        };
        assert_eq!(most_restrictive(vec![accepted, rejected]), rejected);
    }
}
