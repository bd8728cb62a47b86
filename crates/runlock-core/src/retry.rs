//! The Retry Policy Engine: pure, deterministic control of inter-attempt
//! spacing for the acquisition loop.
//!
//! This is intentionally side-effect free -- no sleeping, no I/O -- so the
//! coordinator can drive it and so it is trivial to property-test.

use std::time::Duration;

use rand::Rng;

use crate::error::LockError;

/// Configuration for the acquisition retry loop.
///
/// `max_attempts` counts *retries*, not total tries: with `max_attempts = 0`
/// exactly one attempt is made and any failure surfaces immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Number of retries permitted after the first attempt.
    pub max_attempts: usize,
    /// Delay before the second attempt (before jitter/backoff are applied).
    pub base_delay: Duration,
    /// Upper bound on any single computed delay, before jitter.
    pub max_delay: Duration,
    /// Multiplier applied per additional attempt (exponential backoff base).
    pub backoff_multiplier: f64,
    /// Symmetric uniform jitter applied to each delay, as a fraction of it.
    /// `0.0` yields deterministic timing.
    pub jitter_factor: f64,
    /// Cumulative wait-time ceiling across the whole acquisition loop.
    pub max_total_wait_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(5000),
            backoff_multiplier: 1.5,
            jitter_factor: 0.1,
            max_total_wait_time: Duration::from_millis(30_000),
        }
    }
}

impl RetryConfig {
    /// Validates the configuration, rejecting values that can never produce
    /// sensible retry behavior.
    pub fn validate(&self) -> Result<(), LockError> {
        if self.backoff_multiplier < 1.0 {
            return Err(LockError::InvalidConfig(
                "retry_config.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(LockError::InvalidConfig(
                "retry_config.jitter_factor must be within [0.0, 1.0]".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(LockError::InvalidConfig(
                "retry_config.max_delay must be >= retry_config.base_delay".to_string(),
            ));
        }
        if self.max_total_wait_time.is_zero() && self.max_attempts > 0 {
            return Err(LockError::InvalidConfig(
                "retry_config.max_total_wait_time must be positive when max_attempts > 0"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Computes the delay that should elapse before the attempt at
    /// `attempt_index + 1`. `attempt_index` starts at 0 for the delay before
    /// the second attempt.
    pub fn compute_delay(&self, attempt_index: usize) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let clamped = scaled.clamp(0.0, self.max_delay.as_secs_f64());

        let jitter = if self.jitter_factor > 0.0 {
            rand::rng().random_range(-self.jitter_factor..=self.jitter_factor)
        } else {
            0.0
        };

        let jittered = (clamped * (1.0 + jitter)).max(0.0);
        Duration::from_secs_f64(jittered)
    }

    /// Caps a freshly computed `delay` so that `total_waited + delay` never
    /// exceeds `max_total_wait_time`.
    pub fn cap_to_budget(&self, total_waited: Duration, delay: Duration) -> Duration {
        let remaining = self.max_total_wait_time.saturating_sub(total_waited);
        delay.min(remaining)
    }

    /// Returns `true` while the cumulative wait-time budget is not yet
    /// exhausted.
    pub fn budget_remaining(&self, total_waited: Duration) -> bool {
        total_waited < self.max_total_wait_time
    }
}

/// Builder for [`RetryConfig`], mirroring the fluent builder convention used
/// throughout `runlock`.
#[derive(Debug, Clone)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }
}

impl RetryConfigBuilder {
    /// Creates a new builder seeded with the spec defaults (10 retries,
    /// 200ms base delay, 5000ms cap, 1.5x multiplier, 0.1 jitter, 30s total).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries permitted after the first attempt.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    /// Sets the initial backoff delay.
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.config.base_delay = base_delay;
        self
    }

    /// Sets the per-attempt delay cap (applied before jitter).
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.config.max_delay = max_delay;
        self
    }

    /// Sets the exponential backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    /// Sets the symmetric jitter fraction. `0.0` disables jitter.
    pub fn jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.config.jitter_factor = jitter_factor;
        self
    }

    /// Sets the cumulative wait-time ceiling for the acquisition loop.
    pub fn max_total_wait_time(mut self, max_total_wait_time: Duration) -> Self {
        self.config.max_total_wait_time = max_total_wait_time;
        self
    }

    /// Validates and returns the configured [`RetryConfig`].
    pub fn build(self) -> Result<RetryConfig, LockError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.base_delay, Duration::from_millis(200));
        assert_eq!(config.max_delay, Duration::from_millis(5000));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.jitter_factor, 0.1);
        assert_eq!(config.max_total_wait_time, Duration::from_millis(30_000));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let config = RetryConfigBuilder::new()
            .base_delay(Duration::from_millis(100))
            .backoff_multiplier(2.0)
            .jitter_factor(0.0)
            .build()
            .unwrap();

        assert_eq!(config.compute_delay(0), Duration::from_millis(100));
        assert_eq!(config.compute_delay(1), Duration::from_millis(200));
        assert_eq!(config.compute_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_clamped_to_max_delay() {
        let config = RetryConfigBuilder::new()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(300))
            .backoff_multiplier(10.0)
            .jitter_factor(0.0)
            .build()
            .unwrap();

        // attempt_index=5 would be 100ms * 10^5 without clamping.
        assert_eq!(config.compute_delay(5), Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfigBuilder::new()
            .base_delay(Duration::from_millis(1000))
            .jitter_factor(0.25)
            .build()
            .unwrap();

        for attempt in 0..20 {
            let delay = config.compute_delay(attempt);
            assert!(delay >= Duration::from_millis(0));
            assert!(delay <= Duration::from_millis(1000 * 2)); // generous upper bound
        }
    }

    #[test]
    fn budget_remaining_is_strict_less_than() {
        let config = RetryConfig::default();
        assert!(config.budget_remaining(Duration::from_millis(29_999)));
        assert!(!config.budget_remaining(Duration::from_millis(30_000)));
        assert!(!config.budget_remaining(Duration::from_millis(30_001)));
    }

    #[test]
    fn cap_to_budget_never_exceeds_remaining() {
        let config = RetryConfigBuilder::new()
            .max_total_wait_time(Duration::from_millis(1000))
            .build()
            .unwrap();

        let capped = config.cap_to_budget(Duration::from_millis(900), Duration::from_millis(500));
        assert_eq!(capped, Duration::from_millis(100));
    }

    #[test]
    fn a_small_total_wait_budget_terminates_promptly_even_with_huge_max_attempts() {
        // A very large max_attempts with a tiny max_total_wait_time must not
        // let the loop run away -- the cumulative wait-time ceiling is
        // independent of max_attempts (spec.md section 4.1).
        let config = RetryConfigBuilder::new()
            .max_attempts(1_000_000)
            .base_delay(Duration::from_millis(50))
            .jitter_factor(0.0)
            .max_total_wait_time(Duration::from_millis(120))
            .build()
            .unwrap();

        let mut total_waited = Duration::ZERO;
        let mut attempts = 0;
        while config.budget_remaining(total_waited) && attempts < config.max_attempts {
            let delay = config.cap_to_budget(total_waited, config.compute_delay(attempts));
            total_waited += delay;
            attempts += 1;
            if delay.is_zero() {
                break;
            }
        }

        assert!(attempts < 10, "loop should terminate quickly, got {attempts} attempts");
    }

    #[test]
    fn rejects_sub_unity_backoff_multiplier() {
        let err = RetryConfigBuilder::new()
            .backoff_multiplier(0.5)
            .build()
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_out_of_range_jitter() {
        let err = RetryConfigBuilder::new().jitter_factor(1.5).build().unwrap_err();
        assert!(matches!(err, LockError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_max_delay_below_base_delay() {
        let err = RetryConfigBuilder::new()
            .base_delay(Duration::from_millis(500))
            .max_delay(Duration::from_millis(100))
            .build()
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidConfig(_)));
    }
}
