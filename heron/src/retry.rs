use chrono::{DateTime, Duration, Utc};

use crate::job::JobRecord;

/// Policy computing when a failed job becomes due again.
///
/// The backoff curve is deliberately pluggable; the engine only guarantees
/// that the retry budget shrinks by one per failed attempt.
pub trait RetryPolicy: Send + Sync {
    /// Next due date for `job`, whose `retries` field has already been
    /// decremented for the attempt that just failed.
    fn next_due(&self, now: DateTime<Utc>, job: &JobRecord) -> DateTime<Utc>;
}

/// Exponential backoff: the delay doubles with every consumed retry, capped.
///
/// delay = base_delay * 2^(consumed - 1), consumed counted against
/// `initial_retries`.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffPolicy {
    /// Base delay in milliseconds for the first re-attempt.
    pub base_delay_ms: u64,
    /// Ceiling on the computed delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Retry budget jobs start with, used to derive consumed attempts.
    pub initial_retries: u32,
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_backoff_ms: 300_000, // 5 minutes
            initial_retries: 3,
        }
    }
}

impl ExponentialBackoffPolicy {
    fn delay_ms(&self, retries_left: u32) -> i64 {
        let consumed = self.initial_retries.saturating_sub(retries_left).max(1);
        let exp = (consumed - 1).min(31) as i32;
        let scaled = (self.base_delay_ms as f64) * 2f64.powi(exp);
        scaled.min(self.max_backoff_ms as f64).max(0.0) as i64
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn next_due(&self, now: DateTime<Utc>, job: &JobRecord) -> DateTime<Utc> {
        now + Duration::milliseconds(self.delay_ms(job.retries))
    }
}

/// Constant re-attempt delay.
#[derive(Clone, Debug)]
pub struct FixedDelayPolicy {
    pub delay_ms: u64,
}

impl RetryPolicy for FixedDelayPolicy {
    fn next_due(&self, now: DateTime<Utc>, _job: &JobRecord) -> DateTime<Utc> {
        now + Duration::milliseconds(self.delay_ms as i64)
    }
}
