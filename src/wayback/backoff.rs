//! Retry timing for archive requests.

use std::time::Duration;

use rand::Rng;

/// How hard to retry transient archive failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after an HTTP 429 before giving up.
    pub rate_limit_retries: u32,
    /// First backoff delay after a 429; doubles per attempt.
    pub backoff_base: Duration,
    /// Attempts after a network error before giving up.
    pub transport_retries: u32,
    /// Fixed delay between network-error retries.
    pub transport_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_retries: 5,
            backoff_base: Duration::from_secs(2),
            transport_retries: 3,
            transport_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based) after a 429.
    ///
    /// `base * 2^attempt` plus up to half of `base` of random jitter.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.saturating_mul(1 << attempt.min(10));
        let jitter_cap = u64::try_from(self.backoff_base.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        exp.saturating_add(Duration::from_millis(jitter))
    }
}
