//! # Exponential backoff bounds.
//!
//! [`BackoffPolicy`] holds the bounds shared by every delay strategy:
//! - [`BackoffPolicy::min`] delay after a success (and the base of the doubling);
//! - [`BackoffPolicy::max`] the maximum delay cap;
//! - [`BackoffPolicy::jitter`] optional randomization.
//!
//! The base delay after `n` consecutive failures is `min × 2^(n−1)` clamped to `max`
//! (and `min` when `n == 0`). It is computed with integer arithmetic, so the plain
//! variant returns exact multiples of `min`. Jitter is applied to the clamped base and
//! never feeds back into the next calculation.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use workervisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1)).unwrap();
//!
//! assert_eq!(backoff.base(0), Duration::from_millis(100));
//! assert_eq!(backoff.base(1), Duration::from_millis(100));
//! assert_eq!(backoff.base(2), Duration::from_millis(200));
//! assert_eq!(backoff.base(10), Duration::from_secs(1));
//! ```

use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::delay::{DelayStrategy, ExponentialBackoff, RandomizedExponentialBackoff};
use crate::policies::jitter::JitterPolicy;

/// Bounds and jitter for an exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after a success and base of the doubling.
    pub min: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Jitter applied on top of the base delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `min = 100ms`;
    /// - `max = 30s`;
    /// - `jitter = None`.
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy without jitter, validating `min <= max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        let policy = Self {
            min,
            max,
            jitter: JitterPolicy::None,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// A policy that always yields `interval`.
    pub fn constant(interval: Duration) -> Self {
        Self {
            min: interval,
            max: interval,
            jitter: JitterPolicy::None,
        }
    }

    /// Returns a new policy with the given jitter.
    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Checks the bounds and the jitter factor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::IntervalOrder {
                min: self.min,
                max: self.max,
            });
        }
        self.jitter.validate()
    }

    /// Base delay (no jitter) after `failures` consecutive failures.
    pub fn base(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return self.min.min(self.max);
        }
        let shift = failures - 1;
        if shift >= u32::BITS {
            return self.max;
        }
        match self.min.checked_mul(1u32 << shift) {
            Some(d) => d.min(self.max),
            None => self.max,
        }
    }

    /// Delay after `failures` consecutive failures, jitter applied and clamped to `[min, max]`.
    pub fn delay(&self, failures: u32) -> Duration {
        let base = self.base(failures);
        self.jitter.apply(base).clamp(self.min, self.max.max(self.min))
    }

    /// Builds the stateful delay strategy matching this policy.
    pub fn strategy(&self) -> Result<Box<dyn DelayStrategy>, ConfigError> {
        match self.jitter {
            JitterPolicy::None => Ok(Box::new(ExponentialBackoff::new(self.min, self.max)?)),
            JitterPolicy::Proportional { factor } => Ok(Box::new(
                RandomizedExponentialBackoff::new(self.min, self.max, factor)?,
            )),
        }
    }
}
