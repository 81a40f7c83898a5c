//! # Stateful delay strategies.
//!
//! A [`DelayStrategy`] turns a history of execution outcomes into the next wait:
//!
//! ```text
//! next_delay(true)            → min, failure counter reset to 0
//! next_delay(false) × k       → min × 2^(k−1), clamped to max
//! randomized variant          → the above × random[1 − r, 1 + r], clamped to [min, max]
//! ```
//!
//! Strategies are pure with respect to their own counter: no I/O, no errors after
//! construction.

use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::backoff::BackoffPolicy;
use crate::policies::jitter::JitterPolicy;

/// Maps execution outcomes to the wait before the next execution.
pub trait DelayStrategy: Send + Sync + 'static {
    /// Records one execution outcome and returns the next delay.
    fn next_delay(&mut self, execution_succeeded: bool) -> Duration;

    /// Number of consecutive failures recorded so far.
    fn consecutive_failures(&self) -> u32;
}

/// Plain exponential doubling between `min` and `max`.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use workervisor::{DelayStrategy, ExponentialBackoff};
///
/// let mut s = ExponentialBackoff::new(Duration::from_millis(123), Duration::from_secs(4)).unwrap();
/// assert_eq!(s.next_delay(false), Duration::from_millis(123));
/// assert_eq!(s.next_delay(false), Duration::from_millis(246));
/// assert_eq!(s.next_delay(true), Duration::from_millis(123));
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl ExponentialBackoff {
    /// Creates the strategy; fails when `min > max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            policy: BackoffPolicy::new(min, max)?,
            failures: 0,
        })
    }
}

impl DelayStrategy for ExponentialBackoff {
    fn next_delay(&mut self, execution_succeeded: bool) -> Duration {
        record(&mut self.failures, execution_succeeded);
        self.policy.base(self.failures)
    }

    fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

/// Exponential doubling with proportional jitter, re-drawn on every call.
#[derive(Debug, Clone)]
pub struct RandomizedExponentialBackoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl RandomizedExponentialBackoff {
    /// Creates the strategy; fails when `min > max` or `factor` is outside `[0, 1]`.
    pub fn new(min: Duration, max: Duration, factor: f64) -> Result<Self, ConfigError> {
        let policy =
            BackoffPolicy::new(min, max)?.with_jitter(JitterPolicy::Proportional { factor });
        policy.validate()?;
        Ok(Self {
            policy,
            failures: 0,
        })
    }
}

impl DelayStrategy for RandomizedExponentialBackoff {
    fn next_delay(&mut self, execution_succeeded: bool) -> Duration {
        record(&mut self.failures, execution_succeeded);
        if self.failures == 0 {
            return self.policy.min;
        }
        self.policy.delay(self.failures)
    }

    fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

#[inline]
fn record(failures: &mut u32, succeeded: bool) {
    if succeeded {
        *failures = 0;
    } else {
        *failures = failures.saturating_add(1);
    }
}
