//! Points-per-window rate limiting.
//!
//! Each key gets `points` requests per fixed window of `duration`; the window
//! starts at the key's first request and resets once it has elapsed. Counters
//! live in a [`RateLimitStore`]: [`MemoryRateLimitStore`] keeps them in the
//! process (they reset on restart), while a shared store implements the same
//! trait and relies on its own atomic increment-and-check.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use waypost::rate_limit::{MemoryRateLimitStore, RateLimitPolicy, RateLimiter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryRateLimitStore::new());
//! let limiter = RateLimiter::new(store, RateLimitPolicy::new(2, Duration::from_secs(60)), "global");
//! assert!(limiter.consume("10.0.0.1").await.unwrap().is_allowed());
//! assert!(limiter.consume("10.0.0.1").await.unwrap().is_allowed());
//! assert!(!limiter.consume("10.0.0.1").await.unwrap().is_allowed());
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{BoxError, Error};
use crate::request::Request;

/// Budget for one key: `points` requests per `duration`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub points: u32,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl RateLimitPolicy {
    pub fn new(points: u32, duration: Duration) -> Self {
        Self { points, duration }
    }
}

/// Result of consuming one point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Consumed {
    Allowed { remaining: u32 },
    Exhausted { retry_after: Duration },
}

impl Consumed {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Counter storage shared by every limiter built over it.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Consumes one point for `key` under `policy`.
    async fn consume(&self, key: &str, policy: RateLimitPolicy) -> Result<Consumed, BoxError>;
}

/// Per-key window state.
#[derive(Debug)]
struct Window {
    started: Instant,
    duration: Duration,
    consumed: u32,
}

impl Window {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.duration
    }
}

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Process-local counters in a sharded concurrent map.
///
/// Expired windows are swept from inside [`consume`](RateLimitStore::consume)
/// at most once per sweep interval, so the map only holds keys seen within
/// their policy's window.
#[derive(Debug)]
pub struct MemoryRateLimitStore {
    windows: DashMap<String, Window>,
    sweep_interval: Duration,
    epoch: Instant,
    /// Milliseconds since `epoch` of the last sweep.
    last_sweep: AtomicU64,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            sweep_interval,
            epoch: Instant::now(),
            last_sweep: AtomicU64::new(0),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drops every window whose policy duration has elapsed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.windows.retain(|_, w| !w.expired(now));
    }

    fn maybe_sweep(&self, now: Instant) {
        let now_ms = now.duration_since(self.epoch).as_millis() as u64;
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.sweep_interval.as_millis() as u64 {
            return;
        }
        // One caller per interval does the sweep.
        if self.last_sweep
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let before = self.windows.len();
            self.purge_expired();
            trace!(before, after = self.windows.len(), "swept rate limit windows");
        }
    }
}

impl Default for MemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn consume(&self, key: &str, policy: RateLimitPolicy) -> Result<Consumed, BoxError> {
        let now = Instant::now();
        // Before taking an entry guard: `retain` locks every shard.
        self.maybe_sweep(now);

        // The shard guard lives only for this synchronous block.
        let mut window = self.windows
            .entry(key.to_owned())
            .or_insert_with(|| Window { started: now, duration: policy.duration, consumed: 0 });

        window.duration = policy.duration;
        if window.expired(now) {
            window.started = now;
            window.consumed = 0;
        }

        if window.consumed < policy.points {
            window.consumed += 1;
            Ok(Consumed::Allowed { remaining: policy.points - window.consumed })
        } else {
            let retry_after = policy.duration.saturating_sub(now.duration_since(window.started));
            Ok(Consumed::Exhausted { retry_after })
        }
    }
}

/// Derives the limiter key for a request when the default resolution is not wanted.
pub type KeyFn = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// One limiter instance: a policy, a key prefix and a store.
///
/// Route-level policies get their own prefix so different routes never share
/// buckets even when they share a store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
    prefix: String,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy, prefix: impl Into<String>) -> Self {
        Self { store, policy, prefix: prefix.into() }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub(crate) fn use_store(&mut self, store: Arc<dyn RateLimitStore>) {
        self.store = store;
    }

    pub async fn consume(&self, key: &str) -> Result<Consumed, Error> {
        self.store
            .consume(&format!("{}:{key}", self.prefix), self.policy)
            .await
            .map_err(Error::service)
    }
}

/// Resolves the caller key: custom function, then remote address, then
/// `anonymous`.
///
/// Limits run before authentication, so a per-user key has to come from the
/// key function (for instance by reading the token header).
pub(crate) fn resolve_key(key_fn: Option<&KeyFn>, req: &Request) -> String {
    if let Some(key) = key_fn.and_then(|f| f(req)) {
        return key;
    }
    match req.remote_addr() {
        Some(addr) => format!("ip:{}", addr.ip()),
        None => "anonymous".to_owned(),
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(points: u32, duration: Duration, prefix: &str, store: &Arc<MemoryRateLimitStore>) -> RateLimiter {
        RateLimiter::new(Arc::clone(store) as Arc<dyn RateLimitStore>, RateLimitPolicy::new(points, duration), prefix)
    }

    #[tokio::test]
    async fn third_request_in_window_is_rejected() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = limiter(2, Duration::from_secs(60), "global", &store);

        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(limiter.consume("alice").await.unwrap().is_allowed());
        }
        assert_eq!(results, [true, true, false]);

        match limiter.consume("alice").await.unwrap() {
            Consumed::Exhausted { retry_after } => assert!(retry_after <= Duration::from_secs(60)),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keys_and_prefixes_are_isolated() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let a = limiter(1, Duration::from_secs(60), "route:GET /a", &store);
        let b = limiter(1, Duration::from_secs(60), "route:GET /b", &store);

        assert!(a.consume("k").await.unwrap().is_allowed());
        assert!(!a.consume("k").await.unwrap().is_allowed());
        assert!(a.consume("other").await.unwrap().is_allowed());
        assert!(b.consume("k").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn window_resets_after_duration() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = limiter(1, Duration::from_millis(30), "global", &store);

        assert!(limiter.consume("k").await.unwrap().is_allowed());
        assert!(!limiter.consume("k").await.unwrap().is_allowed());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.consume("k").await.unwrap().is_allowed());

        tokio::time::sleep(Duration::from_millis(40)).await;
        store.purge_expired();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn expired_windows_are_swept_while_consuming() {
        let store = Arc::new(MemoryRateLimitStore::with_sweep_interval(Duration::from_millis(20)));
        let limiter = limiter(1, Duration::from_millis(10), "global", &store);

        for i in 0..10_000 {
            limiter.consume(&format!("10.0.{}.{}", i / 256, i % 256)).await.unwrap();
        }
        assert!(store.len() > 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.consume("10.9.9.9").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn live_windows_survive_a_sweep() {
        let store = Arc::new(MemoryRateLimitStore::with_sweep_interval(Duration::ZERO));
        let short = limiter(1, Duration::from_millis(10), "short", &store);
        let long = limiter(1, Duration::from_secs(60), "long", &store);

        assert!(long.consume("k").await.unwrap().is_allowed());
        assert!(short.consume("k").await.unwrap().is_allowed());
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Sweeps the short window, keeps the long one and its spent point.
        assert!(!long.consume("k").await.unwrap().is_allowed());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn key_resolution_order() {
        let req = Request::from_http(
            http::Request::builder().uri("/").body(bytes::Bytes::new()).unwrap(),
            Some("10.1.2.3:5555".parse().unwrap()),
        );
        assert_eq!(resolve_key(None, &req), "ip:10.1.2.3");

        let custom: KeyFn = Arc::new(|r: &Request| r.header("x-api-key").map(str::to_owned));
        assert_eq!(resolve_key(Some(&custom), &req), "ip:10.1.2.3");

        let keyed = Request::from_http(
            http::Request::builder().uri("/").header("x-api-key", "k1").body(bytes::Bytes::new()).unwrap(),
            None,
        );
        assert_eq!(resolve_key(Some(&custom), &keyed), "k1");

        let anonymous = Request::from_http(
            http::Request::builder().uri("/").body(bytes::Bytes::new()).unwrap(),
            None,
        );
        assert_eq!(resolve_key(None, &anonymous), "anonymous");
    }
}
