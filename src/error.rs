//! Error types used by the workervisor runtime, channels and commands.
//!
//! - [`ConfigError`] invalid configuration, raised at construction time.
//! - [`CommandError`] failure of one unit of work driven by a timer.
//! - [`TimerError`] misuse of the [`IntervalSeparationTimer`](crate::IntervalSeparationTimer) lifecycle.
//! - [`ChannelError`] failures of a worker channel (process start, readiness, transport).
//! - [`DispatchError`] failures surfaced by the [`InvocationDispatcher`](crate::InvocationDispatcher).
//! - [`RuntimeError`] failures of the [`Host`](crate::Host) runtime itself.
//!
//! Every enum provides `as_label` (stable snake_case label for logs/metrics).

use std::time::Duration;
use thiserror::Error;

use crate::channel::ChannelState;
use crate::dispatcher::DispatcherState;

/// # Invalid configuration.
///
/// Configuration errors fail fast at construction and are never silently defaulted.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The minimum interval is greater than the maximum interval.
    #[error("minimum interval {min:?} must not be greater than maximum interval {max:?}")]
    IntervalOrder {
        /// Configured minimum.
        min: Duration,
        /// Configured maximum.
        max: Duration,
    },

    /// A duration field was configured with a negative value.
    #[error("{field} must not be negative (got {value}ms)")]
    NegativeInterval {
        /// Name of the offending field.
        field: &'static str,
        /// Raw configured value in milliseconds.
        value: i64,
    },

    /// The randomization factor is not a finite value in `[0, 1]`.
    #[error("randomization factor must be within [0, 1] (got {factor})")]
    RandomizationFactor {
        /// Configured factor.
        factor: f64,
    },

    /// A required value was zero or otherwise out of range.
    #[error("{field} is out of range: {reason}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// The configuration document could not be read or parsed.
    #[error("failed to load configuration: {error}")]
    Load {
        /// Underlying I/O or parse error message.
        error: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::IntervalOrder { .. } => "config_interval_order",
            ConfigError::NegativeInterval { .. } => "config_negative_interval",
            ConfigError::RandomizationFactor { .. } => "config_randomization_factor",
            ConfigError::OutOfRange { .. } => "config_out_of_range",
            ConfigError::Load { .. } => "config_load",
        }
    }
}

/// # Errors produced by a periodic unit of work.
///
/// `Canceled` is a graceful outcome and is never reported as a fault.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CommandError {
    /// Execution failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Execution observed its cancellation token and stopped early.
    #[error("context cancelled")]
    Canceled,
}

impl CommandError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use workervisor::CommandError;
    ///
    /// let err = CommandError::Fail { error: "boom".into() };
    /// assert_eq!(err.as_label(), "command_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            CommandError::Fail { .. } => "command_failed",
            CommandError::Canceled => "command_canceled",
        }
    }

    /// Indicates whether this outcome is a cancellation rather than a fault.
    pub fn is_canceled(&self) -> bool {
        matches!(self, CommandError::Canceled)
    }
}

/// # Lifecycle misuse of an interval-separation timer.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// `start` was called on a timer that has already been started.
    #[error("timer has already been started")]
    AlreadyStarted,
    /// `stop` was called on a timer that was never started.
    #[error("timer has not been started")]
    NotStarted,
    /// `stop` was called twice.
    #[error("timer has already been stopped")]
    AlreadyStopped,
    /// The timer was disposed.
    #[error("timer has been disposed")]
    Disposed,
}

impl TimerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TimerError::AlreadyStarted => "timer_already_started",
            TimerError::NotStarted => "timer_not_started",
            TimerError::AlreadyStopped => "timer_already_stopped",
            TimerError::Disposed => "timer_disposed",
        }
    }
}

/// # Errors produced by a worker channel.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The operation requires a different channel state.
    #[error("channel is {state:?}, expected Ready")]
    NotReady {
        /// State observed when the call was made.
        state: ChannelState,
    },

    /// The worker process could not be launched.
    #[error("failed to start worker process: {error}")]
    Spawn {
        /// The underlying error message.
        error: String,
    },

    /// The worker did not answer the readiness probe in time.
    #[error("worker did not become ready within {timeout:?}")]
    InitializationTimeout {
        /// The configured initialization timeout.
        timeout: Duration,
    },

    /// The request to the worker failed.
    #[error("worker transport failed: {error}")]
    Transport {
        /// The underlying error message.
        error: String,
        /// `true` when the connection itself is gone (the channel is faulted too).
        connection_broken: bool,
    },

    /// The worker answered with an unexpected status or body.
    #[error("worker returned {status}: {error}")]
    Protocol {
        /// HTTP status returned by the worker.
        status: u16,
        /// Description of the problem.
        error: String,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Canceled,
}

impl ChannelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelError::NotReady { .. } => "channel_not_ready",
            ChannelError::Spawn { .. } => "channel_spawn_failed",
            ChannelError::InitializationTimeout { .. } => "channel_init_timeout",
            ChannelError::Transport { .. } => "channel_transport_failed",
            ChannelError::Protocol { .. } => "channel_protocol_error",
            ChannelError::Canceled => "channel_canceled",
        }
    }

    /// `true` if this error means the worker connection is unusable.
    pub fn is_connection_broken(&self) -> bool {
        matches!(
            self,
            ChannelError::Transport {
                connection_broken: true,
                ..
            }
        )
    }
}

/// # Errors surfaced by the invocation dispatcher.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Invocations are only accepted while the dispatcher is `Initialized`.
    #[error("dispatcher is {state:?}, invocations are not accepted")]
    NotReady {
        /// State observed when the call was made.
        state: DispatcherState,
    },

    /// The current channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::NotReady { .. } => "dispatch_not_ready",
            DispatchError::Channel(e) => e.as_label(),
        }
    }
}

/// # Errors produced by the host runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The dispatcher could not be initialized.
    #[error("dispatcher initialization failed: {0}")]
    Initialize(#[from] DispatchError),

    /// OS signal handlers could not be registered.
    #[error("failed to register shutdown signal handler: {error}")]
    Signal {
        /// The underlying error message.
        error: String,
    },

    /// Shutdown did not complete within the grace period.
    #[error("shutdown timeout {grace:?} exceeded; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use workervisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5) };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Initialize(_) => "runtime_initialize_failed",
            RuntimeError::Signal { .. } => "runtime_signal_failed",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

/// Renders a caught panic payload as text.
pub(crate) fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
