use error::TransferError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Bounded retry with exponential backoff and jitter. Rate-limit errors that
/// carry a server hint wait exactly that long instead of the computed backoff.
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
    total_retries: AtomicU64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(100),
            max: Duration::from_secs(60),
            total_retries: AtomicU64::new(0),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, max: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base,
            max,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Plain exponential backoff for the given zero-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(exp.min(self.max.as_secs_f64()))
    }

    /// The wait before retrying `err` at `attempt`, jitter included, or `None`
    /// when the error is terminal.
    pub fn wait_for(&self, err: &TransferError, attempt: u32) -> Option<Duration> {
        if !err.is_retryable() {
            return None;
        }
        let wait = err.retry_after().unwrap_or_else(|| self.backoff(attempt));
        Some(with_jitter(wait))
    }

    /// Runs `op`, retrying retryable failures up to `max_retries` times.
    pub async fn execute<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(name, attempt, "operation recovered");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let Some(wait) = self.wait_for(&err, attempt) else {
                        return Err(err);
                    };
                    if attempt >= self.max_retries {
                        warn!(name, attempt, "retries exhausted");
                        return Err(err);
                    }
                    warn!(name, attempt, ?wait, kind = ?err.kind(), "retrying");
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Uniform jitter in `[0, 0.1 × wait]` on top of the wait.
fn with_jitter(wait: Duration) -> Duration {
    wait + wait.mul_f64(0.1 * rand::random::<f64>())
}
