use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::BackoffPolicy;

/// Restart and escalation settings of the [`InvocationDispatcher`](crate::InvocationDispatcher).
///
/// - `error_events_threshold`: errors inside the window that trigger host shutdown
///   instead of another restart. Must be at least 1.
/// - `threshold_between_restarts`: an error arriving later than this after the
///   previous one starts a fresh window.
/// - `restart_backoff`: pause between disposing a failed channel and starting its
///   replacement, indexed by the number of errors in the window.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Errors in the window that escalate to host shutdown.
    pub error_events_threshold: usize,
    /// Gap that resets the error window.
    pub threshold_between_restarts: Duration,
    /// Delay before a replacement channel is started.
    pub restart_backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            error_events_threshold: 3,
            threshold_between_restarts: Duration::from_secs(30 * 60),
            restart_backoff: BackoffPolicy {
                min: Duration::from_secs(1),
                max: Duration::from_secs(30),
                ..BackoffPolicy::default()
            },
        }
    }
}

impl DispatcherConfig {
    /// Checks the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.error_events_threshold == 0 {
            return Err(ConfigError::OutOfRange {
                field: "error_events_threshold",
                reason: "must be at least 1",
            });
        }
        self.restart_backoff.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.error_events_threshold, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let cfg = DispatcherConfig {
            error_events_threshold: 0,
            ..DispatcherConfig::default()
        };
        assert_eq!(cfg.validate().unwrap_err().as_label(), "config_out_of_range");
    }
}
