//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] adds randomness to backoff delays so that many workers failing
//! at the same moment do not retry in lockstep.
//!
//! - [`JitterPolicy::None`] no randomization, predictable delays
//! - [`JitterPolicy::Proportional`] delay × random[1 − factor, 1 + factor]

use rand::Rng;
use std::time::Duration;

use crate::error::ConfigError;

/// Policy controlling randomization of retry delays.
///
/// The jitter factor is drawn on **every** call; nothing is cached, so two
/// calls with the same input return different (but bounded) values.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum JitterPolicy {
    /// No jitter: use exact backoff delay.
    #[default]
    None,

    /// Multiply the delay by a factor drawn uniformly from `[1 − factor, 1 + factor]`.
    ///
    /// `factor` must be finite and within `[0, 1]`.
    Proportional {
        /// Randomization factor `r`.
        factor: f64,
    },
}

impl JitterPolicy {
    /// Checks that the randomization factor is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            JitterPolicy::None => Ok(()),
            JitterPolicy::Proportional { factor } => {
                if factor.is_finite() && (0.0..=1.0).contains(&factor) {
                    Ok(())
                } else {
                    Err(ConfigError::RandomizationFactor { factor })
                }
            }
        }
    }

    /// Applies jitter to the given delay.
    ///
    /// The result is **not** clamped; callers clamp to their own bounds.
    pub fn apply(&self, delay: Duration) -> Duration {
        match *self {
            JitterPolicy::None => delay,
            JitterPolicy::Proportional { factor } => proportional(delay, factor),
        }
    }
}

/// delay × random[1 − factor, 1 + factor]
fn proportional(delay: Duration, factor: f64) -> Duration {
    if delay.is_zero() || factor <= 0.0 {
        return delay;
    }
    let mut rng = rand::rng();
    let scale = rng.random_range((1.0 - factor)..=(1.0 + factor));
    let secs = delay.as_secs_f64() * scale;
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let d = Duration::from_millis(750);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn test_proportional_bounds() {
        let policy = JitterPolicy::Proportional { factor: 0.2 };
        for _ in 0..200 {
            let d = policy.apply(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(799), "{d:?} below lower bound");
            assert!(d <= Duration::from_millis(1201), "{d:?} above upper bound");
        }
    }

    #[test]
    fn test_proportional_zero_delay_stays_zero() {
        let policy = JitterPolicy::Proportional { factor: 0.5 };
        assert_eq!(policy.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_out_of_range_factor() {
        assert!(JitterPolicy::Proportional { factor: 0.0 }.validate().is_ok());
        assert!(JitterPolicy::Proportional { factor: 1.0 }.validate().is_ok());
        assert!(JitterPolicy::Proportional { factor: 1.5 }.validate().is_err());
        assert!(JitterPolicy::Proportional { factor: -0.1 }.validate().is_err());
        assert!(
            JitterPolicy::Proportional { factor: f64::NAN }
                .validate()
                .is_err()
        );
    }
}
