//! # Admission limits.
//!
//! ## Sentinel values
//! - `max_degree_of_parallelism = 0` → unlimited (no semaphore created)
//! - `max_queue_length = 0` → unbounded queue
//! - `overload_check_interval = 0s` → the overload probe is asked on every request

use std::time::Duration;

/// Limits applied by the [`AdmissionController`](crate::AdmissionController).
///
/// `max_queue_length` bounds every admitted request that has not completed yet,
/// whether it is waiting for a slot or already running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Requests allowed to run at the same time (`0` = unlimited).
    pub max_degree_of_parallelism: usize,
    /// Outstanding requests allowed before new ones are rejected (`0` = unlimited).
    pub max_queue_length: usize,
    /// How long an overload probe answer is reused.
    pub overload_check_interval: Duration,
    /// Status code of rejections.
    pub rejection_status: u16,
}

impl AdmissionConfig {
    /// Parallelism limit as an `Option` (`None` = unlimited).
    #[inline]
    pub fn parallelism_limit(&self) -> Option<usize> {
        (self.max_degree_of_parallelism > 0).then_some(self.max_degree_of_parallelism)
    }

    /// Queue limit as an `Option` (`None` = unbounded).
    #[inline]
    pub fn queue_limit(&self) -> Option<usize> {
        (self.max_queue_length > 0).then_some(self.max_queue_length)
    }
}

impl Default for AdmissionConfig {
    /// No limits, probe cached for 5s, rejections answered with 429.
    fn default() -> Self {
        Self {
            max_degree_of_parallelism: 0,
            max_queue_length: 0,
            overload_check_interval: Duration::from_secs(5),
            rejection_status: 429,
        }
    }
}
