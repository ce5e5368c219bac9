//! Per-client token-bucket rate limiting.
//!
//! Each key (client IP) owns a bucket that drains at a fixed rate. A request
//! adds a token; once the bucket holds more than a burst's worth, further
//! requests are refused and the token count grows progressively, so a client
//! that keeps hammering waits longer than one that backs off.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Window over which a full burst drains, in seconds.
const BURST_SECONDS: i64 = 10;

/// Tokens accepted within one burst window.
const MAX_TOKENS_PER_BURST: i64 = 20;

/// Ceiling on penalty growth, in seconds of drain time.
const PENALTY_TIME_LIMIT: i64 = 10 * 60;

/// Seconds between sweeps of empty buckets.
pub const SWEEP_INTERVAL_SECS: u64 = 10 * 60;

#[derive(Debug, Default)]
struct Bucket {
    tokens: i64,
    last_drained: i64,
}

impl Bucket {
    fn drain(&mut self, now: i64) {
        let drained = (now - self.last_drained) * MAX_TOKENS_PER_BURST / BURST_SECONDS;
        if drained > 0 {
            self.tokens = (self.tokens - drained).max(0);
            self.last_drained = now;
        }
    }

    fn add_token(&mut self, now: i64) -> bool {
        self.drain(now);
        if self.tokens > MAX_TOKENS_PER_BURST {
            // Penalty tokens: grow by half until the drain time would reach
            // the penalty limit.
            if self.tokens < MAX_TOKENS_PER_BURST * (PENALTY_TIME_LIMIT / BURST_SECONDS) {
                self.tokens += self.tokens / 2;
            }
        }
        self.tokens += 1;
        self.tokens <= MAX_TOKENS_PER_BURST
    }

    /// Seconds until the next token would be accepted.
    fn drain_time(&self) -> i64 {
        (self.tokens - MAX_TOKENS_PER_BURST + 1) * BURST_SECONDS / MAX_TOKENS_PER_BURST
    }

    fn is_empty(&mut self, now: i64) -> bool {
        self.drain(now);
        self.tokens == 0
    }
}

/// Map of client key to bucket. All operations take the single lock for one
/// O(1) bucket mutation.
#[derive(Default)]
pub struct BucketMap {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl BucketMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request for `key`. Returns true when the caller may proceed.
    pub fn add_token(&self, key: &str) -> bool {
        self.add_token_at(key, unix_now())
    }

    /// Seconds the caller should wait before retrying.
    pub fn drain_time(&self, key: &str) -> i64 {
        self.buckets
            .lock()
            .get(key)
            .map(Bucket::drain_time)
            .unwrap_or(0)
    }

    /// Drop buckets that have fully drained. Run periodically from a
    /// background task.
    pub fn sweep(&self) {
        self.sweep_at(unix_now());
    }

    fn add_token_at(&self, key: &str, now: i64) -> bool {
        let mut buckets = self.buckets.lock();
        buckets.entry(key.to_string()).or_default().add_token(now)
    }

    fn sweep_at(&self, now: i64) {
        self.buckets.lock().retain(|_, b| !b.is_empty(now));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buckets.lock().len()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_accepted_then_refused() {
        let mut bucket = Bucket::default();
        let now = 1_000_000;

        for i in 0..MAX_TOKENS_PER_BURST {
            assert!(bucket.add_token(now), "token {i} should be accepted");
        }
        assert!(!bucket.add_token(now), "token past the burst should be refused");
        assert!(bucket.drain_time() > 0);
    }

    #[test]
    fn bucket_drains_over_time() {
        let mut bucket = Bucket::default();
        let now = 1_000_000;

        for _ in 0..MAX_TOKENS_PER_BURST {
            bucket.add_token(now);
        }
        assert!(!bucket.add_token(now));

        // A full burst window later the bucket has fully drained.
        assert!(bucket.add_token(now + BURST_SECONDS + 1));
    }

    #[test]
    fn penalty_grows_but_is_capped() {
        let mut bucket = Bucket::default();
        let now = 1_000_000;
        let cap = MAX_TOKENS_PER_BURST * (PENALTY_TIME_LIMIT / BURST_SECONDS);

        for _ in 0..10_000 {
            bucket.add_token(now);
        }

        // Growth stops once the cap is reached; +1 tokens can still trickle in
        // past it, but nowhere near another half-step.
        assert!(bucket.tokens >= cap);
        assert!(bucket.tokens < cap + cap / 2);
    }

    #[test]
    fn drain_time_reflects_backlog() {
        let mut bucket = Bucket::default();
        let now = 1_000_000;

        for _ in 0..=MAX_TOKENS_PER_BURST {
            bucket.add_token(now);
        }
        // One token over the burst: (2 * 10) / 20 = one second of wait.
        assert_eq!(bucket.drain_time(), 1);
    }

    #[test]
    fn keys_are_independent() {
        let map = BucketMap::new();
        let now = 1_000_000;

        for _ in 0..MAX_TOKENS_PER_BURST {
            assert!(map.add_token_at("10.0.0.1", now));
        }
        assert!(!map.add_token_at("10.0.0.1", now));
        assert!(map.add_token_at("10.0.0.2", now));
    }

    #[test]
    fn sweep_removes_only_empty_buckets() {
        let map = BucketMap::new();
        let now = 1_000_000;

        map.add_token_at("old", now);
        for _ in 0..5 {
            map.add_token_at("busy", now + BURST_SECONDS);
        }
        assert_eq!(map.len(), 2);

        map.sweep_at(now + BURST_SECONDS);
        assert_eq!(map.len(), 1);
        assert_eq!(map.drain_time("old"), 0);
    }
}
