use std::time::Duration;

/// Limits applied while executing a range plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Reads in flight at once for one plan.
    pub max_in_flight: usize,
    /// Retries after the first attempt of a read. Only transient failures
    /// are retried.
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Limit for a single read attempt.
    pub read_timeout: Duration,
    /// Limit for the whole plan, retries and backoff included.
    pub deadline: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            read_timeout: Duration::from_secs(30),
            deadline: None,
        }
    }
}

impl FetchOptions {
    pub fn from_config() -> Self {
        let config = &*fornax_config::CONFIG;
        let base_delay = Duration::from_millis(config.fetch_retry_base_delay_ms);
        Self {
            max_in_flight: config.fetch_max_in_flight.max(1),
            max_retries: config.fetch_max_retries,
            base_delay,
            max_delay: Duration::from_millis(config.fetch_retry_max_delay_ms).max(base_delay),
            read_timeout: config.fetch_read_timeout(),
            deadline: config.fetch_deadline(),
        }
    }

    /// Delay before retry number `retry` (0 based): `base_delay * 2^retry`,
    /// capped at `max_delay`.
    pub fn backoff(&self, retry: usize) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
