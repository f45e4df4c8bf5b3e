//! Token-bucket rate limiting, global and per-domain.
//!
//! Each bucket refills continuously at `rate` tokens per second, computed
//! lazily on every operation. Buckets are individually locked; acquiring
//! from the global and a domain bucket together deducts from both or
//! neither.

use pagemill_config::Config;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use url::Url;

/// Minimum sleep between acquisition attempts; avoids busy-spinning when
/// the computed wait rounds to zero.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// A single token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, rate: f64, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = capacity.min(self.tokens + elapsed * rate);
        self.last_refill = now;
    }
}

impl TokenBucket {
    /// Create a bucket starting full.
    #[must_use]
    pub fn new(rate: f64, capacity: u32) -> Self {
        let capacity = f64::from(capacity);
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume `n` tokens if available.
    pub fn try_acquire(&self, n: u32) -> bool {
        let n = f64::from(n);
        let mut state = self.lock();
        state.refill(self.rate, self.capacity);
        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Estimated wait until `n` tokens are available.
    pub fn time_until(&self, n: u32) -> Duration {
        let n = f64::from(n);
        let mut state = self.lock();
        state.refill(self.rate, self.capacity);
        if state.tokens >= n {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((n - state.tokens) / self.rate)
        }
    }

    /// Tokens currently available.
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        state.refill(self.rate, self.capacity);
        state.tokens
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Point-in-time view of one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSnapshot {
    pub name: String,
    pub available: f64,
    pub capacity: f64,
    pub rate: f64,
    pub utilization: f64,
}

/// Global plus per-domain rate limiting.
#[derive(Debug)]
pub struct RateLimiter {
    global: TokenBucket,
    domain_rate: f64,
    burst_size: u32,
    domains: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(rate: f64, burst_size: u32, per_domain_rps: Option<f64>) -> Self {
        Self {
            global: TokenBucket::new(rate, burst_size),
            domain_rate: per_domain_rps.unwrap_or(rate),
            burst_size,
            domains: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.requests_per_second,
            config.burst_size,
            config.per_domain_rps,
        )
    }

    /// Process-wide limiter built from the default configuration.
    pub fn global() -> &'static RateLimiter {
        static GLOBAL: OnceLock<RateLimiter> = OnceLock::new();
        GLOBAL.get_or_init(|| RateLimiter::from_config(pagemill_config::default_config()))
    }

    fn domain_bucket(&self, host: &str) -> Arc<TokenBucket> {
        let mut domains = self
            .domains
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        domains
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(self.domain_rate, self.burst_size))
            })
            .clone()
    }

    /// Consume `n` global tokens, waiting as long as needed.
    pub async fn acquire(&self, n: u32) {
        loop {
            if self.global.try_acquire(n) {
                return;
            }
            let wait = self.global.time_until(n);
            tokio::time::sleep(wait.max(MIN_WAIT)).await;
        }
    }

    /// Consume `n` tokens from the global bucket and the bucket for
    /// `host(url)`, waiting as long as needed. Deduction is all-or-nothing
    /// per attempt.
    pub async fn acquire_url(&self, url: &Url, n: u32) {
        let Some(host) = url.host_str() else {
            return self.acquire(n).await;
        };
        let domain = self.domain_bucket(host);
        loop {
            if try_acquire_pair(&self.global, &domain, n) {
                return;
            }
            let wait = self.global.time_until(n).max(domain.time_until(n));
            tokio::time::sleep(wait.max(MIN_WAIT)).await;
        }
    }

    /// Blocking variant of [`acquire`](Self::acquire) for synchronous
    /// callers.
    pub fn acquire_blocking(&self, n: u32) {
        loop {
            if self.global.try_acquire(n) {
                return;
            }
            std::thread::sleep(self.global.time_until(n).max(MIN_WAIT));
        }
    }

    /// Blocking variant of [`acquire_url`](Self::acquire_url).
    pub fn acquire_url_blocking(&self, url: &Url, n: u32) {
        let Some(host) = url.host_str() else {
            return self.acquire_blocking(n);
        };
        let domain = self.domain_bucket(host);
        loop {
            if try_acquire_pair(&self.global, &domain, n) {
                return;
            }
            let wait = self.global.time_until(n).max(domain.time_until(n));
            std::thread::sleep(wait.max(MIN_WAIT));
        }
    }

    /// Non-blocking global acquisition.
    pub fn try_acquire(&self, n: u32) -> bool {
        self.global.try_acquire(n)
    }

    /// Non-blocking global + per-domain acquisition; deducts both or
    /// neither.
    pub fn try_acquire_url(&self, url: &Url, n: u32) -> bool {
        let Some(host) = url.host_str() else {
            return self.global.try_acquire(n);
        };
        let domain = self.domain_bucket(host);
        try_acquire_pair(&self.global, &domain, n)
    }

    /// Wait estimate for `n` global tokens.
    pub fn time_until(&self, n: u32) -> Duration {
        self.global.time_until(n)
    }

    /// Wait estimate for `n` tokens across global and domain buckets.
    pub fn time_until_url(&self, url: &Url, n: u32) -> Duration {
        match url.host_str() {
            Some(host) => {
                let domain = self.domain_bucket(host);
                self.global.time_until(n).max(domain.time_until(n))
            }
            None => self.global.time_until(n),
        }
    }

    /// Per-bucket state, global first, then domains in name order.
    pub fn snapshot(&self) -> Vec<BucketSnapshot> {
        let mut out = vec![snapshot_of("global", &self.global)];
        let domains = self
            .domains
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut hosts: Vec<_> = domains.iter().collect();
        hosts.sort_by(|a, b| a.0.cmp(b.0));
        for (host, bucket) in hosts {
            out.push(snapshot_of(host, bucket));
        }
        out
    }
}

fn snapshot_of(name: &str, bucket: &TokenBucket) -> BucketSnapshot {
    let available = bucket.available();
    let capacity = bucket.capacity();
    BucketSnapshot {
        name: name.to_string(),
        available,
        capacity,
        rate: bucket.rate(),
        utilization: if capacity > 0.0 {
            1.0 - available / capacity
        } else {
            0.0
        },
    }
}

/// Deduct `n` from both buckets, or from neither.
///
/// Lock order is fixed (first argument, then second) so concurrent pair
/// acquisitions against the same buckets cannot deadlock.
fn try_acquire_pair(first: &TokenBucket, second: &TokenBucket, n: u32) -> bool {
    let n = f64::from(n);
    let mut a = first.lock();
    a.refill(first.rate, first.capacity);
    let mut b = second.lock();
    b.refill(second.rate, second.capacity);
    if a.tokens >= n && b.tokens >= n {
        a.tokens -= n;
        b.tokens -= n;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::{RateLimiter, TokenBucket};
    use std::time::{Duration, Instant};
    use url::Url;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = TokenBucket::new(1.0, 10);
        assert!((bucket.available() - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_try_acquire_deducts_exactly() {
        let bucket = TokenBucket::new(0.001, 10);
        assert!(bucket.try_acquire(3));
        let available = bucket.available();
        assert!((available - 7.0).abs() < 0.01, "available = {available}");
    }

    #[test]
    fn test_try_acquire_insufficient() {
        let bucket = TokenBucket::new(0.001, 2);
        assert!(bucket.try_acquire(2));
        assert!(!bucket.try_acquire(1));
        // A failed acquisition must not consume anything.
        assert!(bucket.available() < 0.1);
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let bucket = TokenBucket::new(10_000.0, 5);
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.available() <= 5.0);
    }

    #[test]
    fn test_time_until_estimate() {
        let bucket = TokenBucket::new(10.0, 1);
        assert!(bucket.try_acquire(1));
        let wait = bucket.time_until(1);
        // One token at 10/sec refills in ~100ms.
        assert!(wait <= Duration::from_millis(110), "wait = {wait:?}");
        assert!(wait >= Duration::from_millis(50), "wait = {wait:?}");
    }

    #[test]
    fn test_time_until_zero_when_available() {
        let bucket = TokenBucket::new(1.0, 5);
        assert_eq!(bucket.time_until(3), Duration::ZERO);
    }

    #[test]
    fn test_pair_acquisition_all_or_nothing() {
        // Domain bucket drained; global full. The pair acquisition must
        // fail without touching the global balance.
        let limiter = RateLimiter::new(0.001, 5, Some(0.001));
        let url = Url::parse("https://example.com/page").unwrap();

        for _ in 0..5 {
            assert!(limiter.try_acquire_url(&url, 1));
        }
        assert!(!limiter.try_acquire_url(&url, 1));

        let snapshot = limiter.snapshot();
        let global = &snapshot[0];
        assert!(
            global.available < 0.1,
            "global should be exactly drained, got {}",
            global.available
        );
    }

    #[test]
    fn test_domain_isolation() {
        let limiter = RateLimiter::new(0.001, 10, Some(0.001));
        // Give each domain its own burst but share the global bucket.
        let a = Url::parse("https://a.test/").unwrap();
        let b = Url::parse("https://b.test/").unwrap();

        for _ in 0..5 {
            assert!(limiter.try_acquire_url(&a, 1));
        }
        // a's domain bucket still has tokens, b's is untouched.
        assert!(limiter.try_acquire_url(&b, 1));
    }

    #[test]
    fn test_per_domain_rate_override() {
        let limiter = RateLimiter::new(100.0, 10, Some(2.5));
        let url = Url::parse("https://example.com/").unwrap();
        assert!(limiter.try_acquire_url(&url, 1));

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].name, "example.com");
        assert!((snapshot[1].rate - 2.5).abs() < f64::EPSILON);
        assert!((snapshot[0].rate - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_utilization() {
        let limiter = RateLimiter::new(0.001, 4, None);
        assert!(limiter.try_acquire(2));
        let snapshot = limiter.snapshot();
        assert!((snapshot[0].utilization - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_acquire_blocking_waits_for_refill() {
        let limiter = RateLimiter::new(200.0, 1, None);
        assert!(limiter.try_acquire(1));

        let start = Instant::now();
        limiter.acquire_blocking(1);
        assert!(start.elapsed() >= Duration::from_millis(2));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(200.0, 1, None);
        assert!(limiter.try_acquire(1));

        let start = Instant::now();
        limiter.acquire(1).await;
        // One token at 200/sec takes ~5ms to refill.
        assert!(start.elapsed() >= Duration::from_millis(2));
    }

    #[tokio::test]
    async fn test_acquire_url_waits_on_slower_bucket() {
        let limiter = RateLimiter::new(1000.0, 2, Some(100.0));
        let url = Url::parse("https://slow.test/").unwrap();
        assert!(limiter.try_acquire_url(&url, 2));

        let start = Instant::now();
        limiter.acquire_url(&url, 1).await;
        // The domain bucket (100/sec) is the constraint: ~10ms per token.
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
