use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Token bucket over the billed-capacity budget of the remote store. Callers
/// hand in the billed cost of each operation; when the bucket runs dry the
/// caller is suspended until enough budget has refilled.
///
/// Safe for a single caller. Concurrent callers need external mutual
/// exclusion around the whole `consume` await.
pub struct RateLimiter {
    /// Units per second we allow ourselves, also the burst ceiling.
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
    total_consumed: f64,
    total_waits: u64,
    total_wait: Duration,
}

impl RateLimiter {
    pub const DEFAULT_RESERVE: f64 = 0.2;

    /// `reserve` is the fraction of provisioned capacity left for other
    /// consumers of the same container.
    pub fn new(provisioned: f64, reserve: f64) -> Self {
        let capacity = (provisioned * (1.0 - reserve)).max(1.0);
        RateLimiter {
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
            total_consumed: 0.0,
            total_waits: 0,
            total_wait: Duration::ZERO,
        }
    }

    pub fn with_default_reserve(provisioned: f64) -> Self {
        Self::new(provisioned, Self::DEFAULT_RESERVE)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn total_consumed(&self) -> f64 {
        self.total_consumed
    }

    pub fn total_waits(&self) -> u64 {
        self.total_waits
    }

    pub fn total_wait(&self) -> Duration {
        self.total_wait
    }

    /// Takes `cost` units out of the bucket, sleeping first if it is short.
    pub async fn consume(&mut self, cost: f64) {
        if cost <= 0.0 {
            return;
        }
        self.refill();

        if self.tokens < cost {
            let wait = Duration::from_secs_f64((cost - self.tokens) / self.capacity);
            debug!(cost, available = self.tokens, ?wait, "rate limiter out of budget");
            self.total_waits += 1;
            self.total_wait += wait;
            sleep(wait).await;
            self.refill();
        }

        self.tokens -= cost;
        self.total_consumed += cost;
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.capacity).min(self.capacity);
        self.last_refill = now;
    }
}
