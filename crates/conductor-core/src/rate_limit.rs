//! Token-bucket rate limiter keyed by `(identity, tier)` (C13, spec §4.13).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub burst: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        RateLimiterConfig {
            requests_per_second: 10.0,
            burst: 20.0,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_touched: Instant,
}

impl Bucket {
    fn new(config: &RateLimiterConfig) -> Self {
        let now = Instant::now();
        Bucket {
            tokens: config.burst,
            last_refill: now,
            last_touched: now,
        }
    }

    fn refill(&mut self, config: &RateLimiterConfig, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.requests_per_second).min(config.burst);
        self.last_refill = now;
    }

    fn try_take(&mut self, config: &RateLimiterConfig) -> bool {
        let now = Instant::now();
        self.refill(config, now);
        self.last_touched = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_idle(&self, config: &RateLimiterConfig, now: Instant, idle_after: Duration) -> bool {
        self.tokens >= config.burst && now.duration_since(self.last_touched) >= idle_after
    }
}

/// One bucket per `(identity, tier)` key, where identity is derived from the
/// caller's api_key or remote IP and tier names a configured rate class.
pub struct RateLimiter {
    tiers: DashMap<String, RateLimiterConfig>,
    buckets: DashMap<(String, String), Bucket>,
    idle_after: Duration,
}

impl RateLimiter {
    pub fn new(idle_after: Duration) -> Self {
        RateLimiter {
            tiers: DashMap::new(),
            buckets: DashMap::new(),
            idle_after,
        }
    }

    pub fn configure_tier(&self, tier: impl Into<String>, config: RateLimiterConfig) {
        self.tiers.insert(tier.into(), config);
    }

    fn config_for(&self, tier: &str) -> RateLimiterConfig {
        self.tiers.get(tier).map(|c| *c).unwrap_or_default()
    }

    /// Non-blocking: takes one token if available, otherwise refuses.
    pub fn allow(&self, identity: &str, tier: &str) -> bool {
        let config = self.config_for(tier);
        let key = (identity.to_string(), tier.to_string());
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(&config));
        bucket.try_take(&config)
    }

    /// Blocks until a token is available or `cancel` fires, polling at a
    /// fine interval derived from the tier's fill rate.
    pub async fn wait(&self, identity: &str, tier: &str, cancel: &CancellationToken) -> Result<(), ()> {
        loop {
            if self.allow(identity, tier) {
                return Ok(());
            }
            let config = self.config_for(tier);
            let poll_interval = Duration::from_secs_f64((1.0 / config.requests_per_second.max(0.001)).min(1.0).max(0.005));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(()),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Drops buckets that have been full and untouched for `idle_after`.
    pub fn gc(&self) {
        let now = Instant::now();
        self.buckets.retain(|(_, tier), bucket| {
            let config = self.config_for(tier);
            !bucket.is_idle(&config, now, self.idle_after)
        });
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_burst_then_refuses() {
        let limiter = RateLimiter::new(Duration::from_secs(300));
        limiter.configure_tier(
            "default",
            RateLimiterConfig {
                requests_per_second: 1.0,
                burst: 3.0,
            },
        );
        assert!(limiter.allow("tenant-a", "default"));
        assert!(limiter.allow("tenant-a", "default"));
        assert!(limiter.allow("tenant-a", "default"));
        assert!(!limiter.allow("tenant-a", "default"));
    }

    #[test]
    fn buckets_are_independent_per_identity() {
        let limiter = RateLimiter::new(Duration::from_secs(300));
        limiter.configure_tier(
            "default",
            RateLimiterConfig {
                requests_per_second: 1.0,
                burst: 1.0,
            },
        );
        assert!(limiter.allow("tenant-a", "default"));
        assert!(!limiter.allow("tenant-a", "default"));
        assert!(limiter.allow("tenant-b", "default"));
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = RateLimiter::new(Duration::from_secs(300));
        limiter.configure_tier(
            "fast",
            RateLimiterConfig {
                requests_per_second: 100.0,
                burst: 1.0,
            },
        );
        assert!(limiter.allow("x", "fast"));
        assert!(!limiter.allow("x", "fast"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.allow("x", "fast"));
    }

    #[tokio::test]
    async fn wait_returns_cancelled_when_token_unavailable_and_cancelled() {
        let limiter = RateLimiter::new(Duration::from_secs(300));
        limiter.configure_tier(
            "slow",
            RateLimiterConfig {
                requests_per_second: 0.01,
                burst: 1.0,
            },
        );
        assert!(limiter.allow("x", "slow"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = limiter.wait("x", "slow", &cancel).await;
        assert!(result.is_err());
    }

    #[test]
    fn gc_removes_only_idle_full_buckets() {
        let limiter = RateLimiter::new(Duration::from_millis(1));
        limiter.configure_tier(
            "default",
            RateLimiterConfig {
                requests_per_second: 1.0,
                burst: 5.0,
            },
        );
        limiter.allow("idle-tenant", "default");
        std::thread::sleep(Duration::from_millis(5));
        // Bucket has refilled back to burst and hasn't been touched since;
        // it is idle and should be collected.
        limiter.gc();
        assert_eq!(limiter.bucket_count(), 0);
    }
}
