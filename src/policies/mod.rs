//! Backoff and delay policies.
//!
//! This module groups the knobs that control **how long** to wait between
//! executions of a periodic command, between readiness probes, and between
//! worker restarts.
//!
//! ## Contents
//! - [`BackoffPolicy`] bounds of the exponential doubling (min / max + jitter)
//! - [`JitterPolicy`] randomization applied to a backoff delay
//! - [`DelayStrategy`] stateful outcome → delay mapping
//!   ([`ExponentialBackoff`], [`RandomizedExponentialBackoff`])
//!
//! ## Quick wiring
//! ```text
//! BackoffPolicy ──► strategy() ──► Box<dyn DelayStrategy>
//!      │                               └─► timer::BackoffCommand (health pings)
//!      ├─► base(attempt)  ──► dispatcher restart delay
//!      └─► constant(poll) ──► channel readiness polling
//! ```

mod backoff;
mod delay;
mod jitter;

pub use backoff::BackoffPolicy;
pub use delay::{DelayStrategy, ExponentialBackoff, RandomizedExponentialBackoff};
pub use jitter::JitterPolicy;
