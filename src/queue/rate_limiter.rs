//! Requeue delay policies.
//!
//! A controller requeue is delayed by the stricter of two limiters: a
//! per-item exponential backoff that grows with consecutive failures of the
//! same item, and a global token bucket bounding the aggregate rate.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::QueueConfig;

pub trait RateLimiter<T>: Send + Sync {
    /// Delay before `item` may be processed again. Records one requeue.
    fn when(
        &self,
        item: &T,
    ) -> Duration;

    /// Drops any failure history for `item`
    fn forget(
        &self,
        item: &T,
    );

    /// Consecutive requeues recorded for `item`
    fn num_requeues(
        &self,
        item: &T,
    ) -> usize;
}

/// `base * 2^failures`, capped at `max`
pub struct ItemExponentialFailureRateLimiter<T> {
    failures: Mutex<HashMap<T, u32>>,
    base: Duration,
    max: Duration,
}

impl<T> ItemExponentialFailureRateLimiter<T> {
    pub fn new(
        base: Duration,
        max: Duration,
    ) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base,
            max,
        }
    }
}

impl<T> RateLimiter<T> for ItemExponentialFailureRateLimiter<T>
where
    T: Clone + Eq + Hash + Send + Sync,
{
    fn when(
        &self,
        item: &T,
    ) -> Duration {
        let mut failures = self.failures.lock();
        let exp = failures.entry(item.clone()).or_insert(0);
        let attempt = *exp;
        *exp = exp.saturating_add(1);

        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    fn forget(
        &self,
        item: &T,
    ) {
        self.failures.lock().remove(item);
    }

    fn num_requeues(
        &self,
        item: &T,
    ) -> usize {
        self.failures.lock().get(item).copied().unwrap_or(0) as usize
    }
}

struct TokenBucket {
    qps: f64,
    burst: f64,
    /// May go negative: outstanding reservations waiting for refill
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn reserve_at(
        &mut self,
        now: Instant,
    ) -> Duration {
        if now > self.last_refill {
            let elapsed = now.duration_since(self.last_refill).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.qps).min(self.burst);
            self.last_refill = now;
        }

        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((-self.tokens * 1_000_000_000.0 / self.qps).ceil() as u64)
    }
}

/// Global token bucket shared by every item
pub struct BucketRateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl BucketRateLimiter {
    pub fn new(
        qps: u64,
        burst: u64,
    ) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            bucket: Mutex::new(TokenBucket {
                qps: qps.max(1) as f64,
                burst,
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }
}

impl<T> RateLimiter<T> for BucketRateLimiter {
    fn when(
        &self,
        _item: &T,
    ) -> Duration {
        self.bucket.lock().reserve_at(Instant::now())
    }

    fn forget(
        &self,
        _item: &T,
    ) {
    }

    fn num_requeues(
        &self,
        _item: &T,
    ) -> usize {
        0
    }
}

/// Applies every inner limiter and returns the longest delay
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Box<dyn RateLimiter<T>>>,
}

impl<T> MaxOfRateLimiter<T> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

impl<T> RateLimiter<T> for MaxOfRateLimiter<T>
where
    T: Send + Sync,
{
    fn when(
        &self,
        item: &T,
    ) -> Duration {
        self.limiters.iter().map(|l| l.when(item)).max().unwrap_or(Duration::ZERO)
    }

    fn forget(
        &self,
        item: &T,
    ) {
        for l in &self.limiters {
            l.forget(item);
        }
    }

    fn num_requeues(
        &self,
        item: &T,
    ) -> usize {
        self.limiters.iter().map(|l| l.num_requeues(item)).max().unwrap_or(0)
    }
}

/// Per-item backoff combined with the global bucket, as configured
pub fn default_rate_limiter<T>(config: &QueueConfig) -> MaxOfRateLimiter<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            config.base_delay(),
            config.max_delay(),
        )),
        Box::new(BucketRateLimiter::new(config.qps, config.burst)),
    ])
}
