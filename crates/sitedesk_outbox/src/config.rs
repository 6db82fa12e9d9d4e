//! Configuration for the outbox.

use crate::error::{OutboxError, OutboxResult};
use crate::journal::CorruptionPolicy;
use crate::policy::ResponsePolicy;
use rand::Rng;
use std::time::Duration;

/// Configuration for queueing and replaying mutations.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Per-entry retry and dead-letter policy.
    pub retry: RetryConfig,
    /// How server responses map to applied / retry / reject.
    pub response_policy: ResponsePolicy,
    /// Deadline for a single replay request.
    pub request_timeout: Duration,
    /// Upper bound on the wall time of one drain pass. `None` means unbounded.
    pub drain_budget: Option<Duration>,
    /// Fallback interval at which the worker drains even without a wake-up.
    pub poll_interval: Duration,
    /// Dead journal records tolerated before the journal is compacted.
    pub compact_threshold: usize,
    /// What to do with a corrupt journal on open.
    pub corruption_policy: CorruptionPolicy,
}

impl OutboxConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            response_policy: ResponsePolicy::StatusAware,
            request_timeout: Duration::from_secs(30),
            drain_budget: Some(Duration::from_secs(300)),
            poll_interval: Duration::from_secs(60),
            compact_threshold: 1024,
            corruption_policy: CorruptionPolicy::Fail,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the response policy.
    pub fn with_response_policy(mut self, policy: ResponsePolicy) -> Self {
        self.response_policy = policy;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the drain pass budget.
    pub fn with_drain_budget(mut self, budget: Option<Duration>) -> Self {
        self.drain_budget = budget;
        self
    }

    /// Sets the worker's fallback poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the compaction threshold.
    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }

    /// Sets the corruption policy used when opening a journal.
    pub fn with_corruption_policy(mut self, policy: CorruptionPolicy) -> Self {
        self.corruption_policy = policy;
        self
    }

    /// Checks that the values are usable.
    pub fn validate(&self) -> OutboxResult<()> {
        if self.request_timeout.is_zero() {
            return Err(OutboxError::InvalidConfig(
                "request_timeout must be non-zero".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(OutboxError::InvalidConfig(
                "poll_interval must be non-zero".into(),
            ));
        }
        self.retry.validate()
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior of individual mutations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts allowed before a mutation is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Upper bound for any retry delay.
    pub const MAX_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Retries forever with no delay. Mirrors purely opportunistic replay.
    pub fn immediate_unbounded() -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay to wait after `failed_attempts` consecutive failures.
    ///
    /// Zero failures means no delay.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let cap = self.max_delay.min(Self::MAX_DELAY).as_secs_f64();
        // f64::min ignores NaN, so the result is always finite and in range.
        let delay_secs = base_delay.min(cap).max(0.0);

        if self.add_jitter && delay_secs > 0.0 {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Returns true once `attempts` failures exhaust the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    fn validate(&self) -> OutboxResult<()> {
        if self.max_attempts == 0 {
            return Err(OutboxError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(OutboxError::InvalidConfig(
                "backoff_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if self.max_delay > Self::MAX_DELAY {
            return Err(OutboxError::InvalidConfig(format!(
                "max_delay must not exceed {:?}",
                Self::MAX_DELAY
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(OutboxError::InvalidConfig(
                "initial_delay must not exceed max_delay".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = OutboxConfig::new()
            .with_request_timeout(Duration::from_secs(5))
            .with_drain_budget(None)
            .with_poll_interval(Duration::from_secs(15))
            .with_compact_threshold(10)
            .with_response_policy(ResponsePolicy::AnyResponse);

        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.drain_budget, None);
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.compact_threshold, 10);
        assert_eq!(config.response_policy, ResponsePolicy::AnyResponse);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(OutboxConfig::new()
            .with_request_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(OutboxConfig::new()
            .with_retry(RetryConfig::new(0))
            .validate()
            .is_err());
        assert!(OutboxConfig::new()
            .with_retry(RetryConfig::new(3).with_backoff_multiplier(0.5))
            .validate()
            .is_err());
        assert!(OutboxConfig::new()
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_secs(10))
                    .with_max_delay(Duration::from_secs(1))
            )
            .validate()
            .is_err());
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay3 = config.delay_for_attempt(3);
        assert!(delay3 >= Duration::from_millis(400));
        assert!(delay3 <= Duration::from_millis(500));
    }

    #[test]
    fn retry_delay_without_jitter_is_exact() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(50))
            .with_jitter(false);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(100));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(40);
        assert!(delay <= Duration::from_millis(6250));
    }

    #[test]
    fn unbounded_max_delay_is_rejected_and_clamped() {
        let config = RetryConfig::new(64)
            .with_max_delay(Duration::MAX)
            .with_backoff_multiplier(1e300);
        assert!(OutboxConfig::new().with_retry(config.clone()).validate().is_err());
        assert!(OutboxConfig::new()
            .with_retry(RetryConfig::new(3).with_max_delay(RetryConfig::MAX_DELAY))
            .validate()
            .is_ok());

        // Unvalidated configs still produce a delay an Instant can absorb.
        let delay = config.delay_for_attempt(60);
        assert!(delay <= RetryConfig::MAX_DELAY.mul_f64(1.25));
        assert!(std::time::Instant::now().checked_add(delay).is_some());
    }

    #[test]
    fn exhaustion() {
        let config = RetryConfig::new(3);
        assert!(!config.is_exhausted(2));
        assert!(config.is_exhausted(3));
        assert!(!RetryConfig::immediate_unbounded().is_exhausted(1_000_000));
        assert_eq!(
            RetryConfig::immediate_unbounded().delay_for_attempt(7),
            Duration::ZERO
        );
    }
}
