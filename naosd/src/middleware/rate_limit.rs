//! Per-subject-per-route token bucket, grounded on the key/rule shape in
//! the teacher's `ferrex-core::auth::rate_limit` (`RateLimitKey`,
//! `RateLimitRule`) but backed by an in-process `DashMap` bucket rather
//! than a pluggable backend trait, since the daemon has no distributed
//! deployment to share state across. Default 10 requests/sec, burst 20,
//! per `spec.md` §4.8.

use std::time::Instant;

use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RateLimitKey {
    pub subject: Uuid,
    pub route: &'static str,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<RateLimitKey, Bucket>,
    rate_per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        Self { buckets: DashMap::new(), rate_per_sec: rate_per_sec as f64, burst: burst as f64 }
    }

    /// Consumes one token for `key`. Returns `true` if the request is
    /// allowed, `false` if the bucket is exhausted.
    pub fn check(&self, key: RateLimitKey) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key).or_insert_with(|| Bucket { tokens: self.burst, last_refill: now });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_exhausted_then_refills_over_time() {
        let limiter = RateLimiter::new(10, 20);
        let key = RateLimitKey { subject: Uuid::nil(), route: "zfs/pools" };
        for _ in 0..20 {
            assert!(limiter.check(key.clone()));
        }
        assert!(!limiter.check(key.clone()));
    }

    #[test]
    fn distinct_routes_have_independent_buckets() {
        let limiter = RateLimiter::new(10, 1);
        let a = RateLimitKey { subject: Uuid::nil(), route: "a" };
        let b = RateLimitKey { subject: Uuid::nil(), route: "b" };
        assert!(limiter.check(a.clone()));
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }
}
