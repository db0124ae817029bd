//! Requeue delay policies for failed keys.
//!
//! A [`RateLimiter`] answers "how long until this key may be retried?" and
//! remembers per-key failure counts until told to [`RateLimiter::forget`] the
//! key. The default combines per-key exponential backoff with an overall
//! token bucket so that a burst of failing keys cannot hammer the provider.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::key::ObjectKey;

/// Per-key retry delay policy
pub trait RateLimiter: Send + Sync {
    /// Delay before `key` should be retried; records one more failure
    fn when(&self, key: &ObjectKey) -> Duration;

    /// Clear the failure history of `key`
    fn forget(&self, key: &ObjectKey);

    /// How many times `key` has been rate limited since it was last forgotten
    fn num_requeues(&self, key: &ObjectKey) -> u32;
}

/// Exponential backoff per key: `base * multiplier^failures`, capped at `max`.
#[derive(Debug)]
pub struct ItemExponentialLimiter {
    base: Duration,
    max: Duration,
    multiplier: f64,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl ItemExponentialLimiter {
    /// Doubling backoff between `base` and `max`
    pub fn new(base: Duration, max: Duration) -> Self {
        Self::with_multiplier(base, max, 2.0)
    }

    /// Backoff with a custom growth factor
    pub fn with_multiplier(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for ItemExponentialLimiter {
    fn when(&self, key: &ObjectKey) -> Duration {
        let exponent = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.clone()).or_insert(0);
            let exponent = *count;
            *count = count.saturating_add(1);
            exponent
        };

        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let nanos = self.base.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max.as_nanos() as f64 {
            return self.max;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    fn forget(&self, key: &ObjectKey) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

/// Overall token bucket: `qps` sustained, up to `burst` at once.
///
/// Not per key; it bounds the total retry rate of a queue.
#[derive(Debug)]
pub struct BucketLimiter {
    qps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Instant,
}

impl BucketLimiter {
    /// Bucket refilled at `qps` tokens per second holding at most `burst`
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: qps.max(f64::MIN_POSITIVE),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for BucketLimiter {
    fn when(&self, _key: &ObjectKey) -> Duration {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.qps).min(self.burst);
        state.last = now;
        state.tokens -= 1.0;

        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.qps)
        }
    }

    fn forget(&self, _key: &ObjectKey) {}

    fn num_requeues(&self, _key: &ObjectKey) -> u32 {
        0
    }
}

/// Takes the longest delay of every inner limiter
pub struct MaxOfLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfLimiter {
    /// Combine the given limiters
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfLimiter {
    fn when(&self, key: &ObjectKey) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &ObjectKey) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-key backoff 5ms..1000s combined with an overall 10 qps / 100 burst bucket
pub fn default_controller_limiter() -> Box<dyn RateLimiter> {
    Box::new(MaxOfLimiter::new(vec![
        Box::new(ItemExponentialLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        )),
        Box::new(BucketLimiter::new(10.0, 100)),
    ]))
}
