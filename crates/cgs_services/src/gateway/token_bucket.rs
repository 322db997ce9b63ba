//! Per-key token bucket rate limiting for inbound gateway traffic.
//!
//! Buckets refill lazily on access, so idle keys cost nothing between
//! requests. Keys are typically session or peer identifiers.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

/// Bucket sizing shared by every key.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    /// Maximum burst size.
    pub capacity: f64,
    /// Sustained tokens per second.
    pub refill_per_sec: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 20.0,
            refill_per_sec: 10.0,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Lazily-refilled token buckets, one per key.
pub struct TokenBucket {
    config: TokenBucketConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one token for `key`. Returns false when the bucket is empty.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_n(key, 1.0)
    }

    /// Takes `n` tokens for `key` atomically.
    pub fn try_acquire_n(&self, key: &str, n: f64) -> bool {
        self.acquire_at(key, n, Instant::now())
    }

    /// Tokens currently available for `key`, after refill.
    pub fn available(&self, key: &str) -> f64 {
        let mut buckets = self.buckets.lock();
        let bucket = self.bucket_entry(&mut buckets, key, Instant::now());
        bucket.tokens
    }

    /// Drops state for keys that have fully refilled, bounding memory on
    /// long-running gateways.
    pub fn prune_full(&self) {
        let now = Instant::now();
        let config = self.config;
        self.buckets.lock().retain(|_, bucket| {
            refill(bucket, &config, now);
            bucket.tokens < config.capacity
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }

    fn acquire_at(&self, key: &str, n: f64, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        let bucket = self.bucket_entry(&mut buckets, key, now);
        if bucket.tokens >= n {
            bucket.tokens -= n;
            true
        } else {
            false
        }
    }

    fn bucket_entry<'a>(
        &self,
        buckets: &'a mut HashMap<String, Bucket>,
        key: &str,
        now: Instant,
    ) -> &'a mut Bucket {
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.config.capacity,
            last_refill: now,
        });
        refill(bucket, &self.config, now);
        bucket
    }
}

fn refill(bucket: &mut Bucket, config: &TokenBucketConfig, now: Instant) {
    let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
    if elapsed > 0.0 {
        bucket.tokens = (bucket.tokens + elapsed * config.refill_per_sec).min(config.capacity);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(capacity: f64, rate: f64) -> TokenBucket {
        TokenBucket::new(TokenBucketConfig {
            capacity,
            refill_per_sec: rate,
        })
    }

    #[test]
    fn burst_up_to_capacity_then_empty() {
        let bucket = limiter(3.0, 1.0);
        assert!(bucket.try_acquire("peer"));
        assert!(bucket.try_acquire("peer"));
        assert!(bucket.try_acquire("peer"));
        assert!(!bucket.try_acquire("peer"));
    }

    #[test]
    fn keys_are_independent() {
        let bucket = limiter(1.0, 1.0);
        assert!(bucket.try_acquire("a"));
        assert!(!bucket.try_acquire("a"));
        assert!(bucket.try_acquire("b"));
    }

    #[test]
    fn refill_restores_tokens() {
        let bucket = limiter(2.0, 1000.0);
        let start = Instant::now();
        assert!(bucket.acquire_at("peer", 2.0, start));
        assert!(!bucket.acquire_at("peer", 1.0, start));
        // 2ms at 1000 tokens/sec refills 2 tokens.
        assert!(bucket.acquire_at("peer", 2.0, start + Duration::from_millis(2)));
    }

    #[test]
    fn refill_caps_at_capacity() {
        let bucket = limiter(2.0, 1000.0);
        let start = Instant::now();
        assert!(bucket.acquire_at("peer", 1.0, start));
        // A long idle period cannot exceed capacity.
        assert!(bucket.acquire_at("peer", 2.0, start + Duration::from_secs(60)));
        assert!(!bucket.acquire_at("peer", 1.0, start + Duration::from_secs(60)));
    }

    #[test]
    fn multi_token_acquire_is_atomic() {
        let bucket = limiter(5.0, 0.0);
        assert!(!bucket.try_acquire_n("peer", 6.0));
        // The failed acquire must not have consumed anything.
        assert!(bucket.try_acquire_n("peer", 5.0));
    }

    #[test]
    fn prune_drops_idle_keys() {
        let bucket = limiter(1.0, 1_000_000.0);
        bucket.try_acquire("a");
        assert_eq!(bucket.tracked_keys(), 1);
        std::thread::sleep(Duration::from_millis(5));
        bucket.prune_full();
        assert_eq!(bucket.tracked_keys(), 0);
    }
}
