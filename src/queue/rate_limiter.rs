//! Retry delay policies for the work queue.
//!
//! A limiter answers "how long should this key wait before its next attempt"
//! and keeps whatever per-key failure history it needs to answer that.

use crate::model::ResourceKey;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Decides the delay before a key is re-delivered.
pub trait RateLimiter: Send + Sync {
    /// Delay for the next attempt of `key`. Counts as a failure.
    fn when(&self, key: &ResourceKey) -> Duration;

    /// Drop all history for `key`.
    fn forget(&self, key: &ResourceKey);

    /// Failures recorded for `key` since it was last forgotten.
    fn num_requeues(&self, key: &ResourceKey) -> u32;
}

// ---------------------------------------------------------------------------
// Per-item exponential backoff
// ---------------------------------------------------------------------------

/// `base * 2^failures`, capped at `max`.
pub struct ItemExponentialRateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ResourceKey, u32>>,
}

impl ItemExponentialRateLimiter {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn backoff(&self, exp: u32) -> Duration {
        let factor = 2u32.checked_pow(exp);
        factor
            .and_then(|f| self.base.checked_mul(f))
            .map_or(self.max, |d| d.min(self.max))
    }
}

impl RateLimiter for ItemExponentialRateLimiter {
    fn when(&self, key: &ResourceKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.clone()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);
        self.backoff(exp)
    }

    fn forget(&self, key: &ResourceKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Overall token bucket
// ---------------------------------------------------------------------------

/// Token bucket shared by every key. Limits the total retry rate, not
/// per-key history, so it never counts requeues.
pub struct BucketRateLimiter {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

impl BucketRateLimiter {
    pub fn new(per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: governor::RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            clock: DefaultClock::default(),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _key: &ResourceKey) -> Duration {
        match self.limiter.check() {
            Ok(()) => Duration::ZERO,
            // A denied check takes no cell; concurrent denials see the same wait.
            Err(not_until) => not_until.wait_time_from(self.clock.now()),
        }
    }

    fn forget(&self, _key: &ResourceKey) {}

    fn num_requeues(&self, _key: &ResourceKey) -> u32 {
        0
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Waits as long as the slowest of its members.
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &ResourceKey) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &ResourceKey) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-key exponential backoff combined with an overall 10 qps / 100 burst
/// bucket.
pub fn default_controller_rate_limiter(base: Duration, max: Duration) -> MaxOfRateLimiter {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialRateLimiter::new(base, max)),
        Box::new(BucketRateLimiter::new(10, 100)),
    ])
}
