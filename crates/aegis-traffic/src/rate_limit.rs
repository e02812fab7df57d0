//! Per-key token-bucket admission control.
//!
//! A bucket holds at most `limit` tokens and refills continuously at
//! `limit / window`. Refill only advances the bucket clock by the time that
//! was actually converted into whole tokens, so sub-token remainders carry
//! over to the next check instead of being lost.
//!
//! A bucket left alone for a whole window is full again and carries no
//! state a fresh bucket would not have, so such buckets are swept once the
//! map grows past a threshold.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

use crate::types::RateLimitResult;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
    last_seen: Instant,
    window: Duration,
}

impl Bucket {
    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) >= self.window
    }

    fn refill(&mut self, limit: u32, window: Duration, now: Instant) {
        // a lowered limit applies immediately
        self.tokens = self.tokens.min(limit);

        let window_nanos = window.as_nanos();
        if window_nanos == 0 {
            self.tokens = limit;
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill).as_nanos();
        let add = elapsed * u128::from(limit) / window_nanos;
        if add == 0 {
            return;
        }

        let refilled = u128::from(self.tokens) + add;
        if refilled >= u128::from(limit) {
            self.tokens = limit;
            self.last_refill = now;
        } else {
            self.tokens = u32::try_from(refilled).unwrap_or(limit);
            let consumed = add * window_nanos / u128::from(limit);
            let consumed = Duration::from_nanos(u64::try_from(consumed).unwrap_or(u64::MAX));
            self.last_refill = self.last_refill.checked_add(consumed).unwrap_or(now);
        }
    }
}

/// Bucket count at which a check first sweeps idle buckets.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug)]
struct Buckets {
    map: HashMap<String, Bucket>,
    sweep_at: usize,
}

impl Buckets {
    fn prune(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, bucket| !bucket.is_idle(now));
        self.sweep_at = SWEEP_THRESHOLD.max(self.map.len() * 2);
        let removed = before - self.map.len();
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.map.len(),
                "Pruned idle rate-limit buckets"
            );
        }
        removed
    }
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            sweep_at: SWEEP_THRESHOLD,
        }
    }
}

/// Token-bucket rate limiter keyed by arbitrary strings.
///
/// Each key gets its own bucket on first use, starting full. Checks for
/// different keys only contend on the map lock, never on each other's
/// refill arithmetic.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    /// Create a limiter with no buckets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take one token from `key`'s bucket.
    #[must_use]
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitResult {
        self.check_at(key, limit, window, Instant::now())
    }

    /// Like [`check`](Self::check), against an explicit clock reading.
    #[must_use]
    pub fn check_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitResult {
        let reset_at = Utc::now()
            + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());

        if limit == 0 {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_at,
            };
        }

        let mut buckets = self.buckets.lock();
        if buckets.map.len() >= buckets.sweep_at {
            buckets.prune(now);
        }
        let bucket = buckets.map.entry(key.to_string()).or_insert(Bucket {
            tokens: limit,
            last_refill: now,
            last_seen: now,
            window,
        });
        bucket.refill(limit, window, now);
        bucket.last_seen = now;
        bucket.window = window;

        let allowed = bucket.tokens > 0;
        if allowed {
            bucket.tokens -= 1;
        } else {
            tracing::debug!(key = %key, limit, "Rate limit exceeded");
        }

        RateLimitResult {
            allowed,
            remaining: bucket.tokens,
            reset_at,
        }
    }

    /// Drop buckets that have not been checked for a whole window.
    /// Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        self.prune_idle_at(Instant::now())
    }

    /// Like [`prune_idle`](Self::prune_idle), against an explicit clock
    /// reading.
    pub fn prune_idle_at(&self, now: Instant) -> usize {
        self.buckets.lock().prune(now)
    }

    /// Forget `key`'s bucket. Returns true if one existed.
    pub fn reset(&self, key: &str) -> bool {
        self.buckets.lock().map.remove(key).is_some()
    }

    /// Forget every bucket.
    pub fn clear(&self) {
        self.buckets.lock().map.clear();
    }

    /// Number of keys with a bucket.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().map.len()
    }
}
