//! # Periodic commands driven by an [`IntervalSeparationTimer`](crate::IntervalSeparationTimer).
//!
//! - [`IntervalCommand`] one unit of work plus the pause to take before it.
//! - [`CommandFn`] closure-backed command with a fixed separation interval.
//! - [`FallibleCommand`] work that reports success or failure as a `bool`.
//! - [`BackoffCommand`] adapts a [`FallibleCommand`] so that the pause grows with
//!   consecutive failures and snaps back to the minimum after a success.
//!
//! ```text
//! BackoffCommand(min=123ms, max=4s)
//!   interval: 0ms    → try_execute() = false
//!   interval: 123ms  → try_execute() = false
//!   interval: 246ms  → try_execute() = false
//!   interval: 492ms  → try_execute() = true
//!   interval: 123ms  → ...
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{CommandError, ConfigError};
use crate::policies::{DelayStrategy, ExponentialBackoff, RandomizedExponentialBackoff};

/// # Periodic unit of work.
///
/// The timer asks for [`separation_interval`](IntervalCommand::separation_interval)
/// before every execution, so implementations may change it between runs.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use workervisor::{CommandError, IntervalCommand};
///
/// struct Sweep;
///
/// #[async_trait]
/// impl IntervalCommand for Sweep {
///     fn separation_interval(&self) -> Duration { Duration::from_secs(5) }
///
///     async fn execute(&self, ctx: CancellationToken) -> Result<(), CommandError> {
///         if ctx.is_cancelled() {
///             return Err(CommandError::Canceled);
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait IntervalCommand: Send + Sync + 'static {
    /// Pause to take before the next execution.
    fn separation_interval(&self) -> Duration;

    /// Runs one execution.
    ///
    /// Returning [`CommandError::Canceled`] after observing `ctx` is a graceful stop.
    /// Any other error is routed to the timer's fault handler.
    async fn execute(&self, ctx: CancellationToken) -> Result<(), CommandError>;
}

/// Closure-backed [`IntervalCommand`] with a fixed separation interval.
///
/// Each execution calls the closure to create a fresh future.
pub struct CommandFn<F> {
    interval: Duration,
    f: F,
}

impl<F> CommandFn<F> {
    /// Creates a new function-backed command.
    pub fn new(interval: Duration, f: F) -> Self {
        Self { interval, f }
    }

    /// Creates the command and returns it as a shared handle.
    pub fn arc(interval: Duration, f: F) -> Arc<Self> {
        Arc::new(Self::new(interval, f))
    }
}

#[async_trait]
impl<F, Fut> IntervalCommand for CommandFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
{
    fn separation_interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, ctx: CancellationToken) -> Result<(), CommandError> {
        (self.f)(ctx).await
    }
}

/// Work that reports whether it succeeded.
///
/// `Ok(false)` is an ordinary failure that lengthens the next pause;
/// `Err` is a fault and bypasses the backoff entirely.
#[async_trait]
pub trait FallibleCommand: Send + Sync + 'static {
    /// Attempts the work once.
    async fn try_execute(&self, ctx: CancellationToken) -> Result<bool, CommandError>;
}

/// [`IntervalCommand`] whose separation interval follows a [`DelayStrategy`].
///
/// The interval is zero before the first execution, so the first attempt runs
/// immediately after the timer starts.
pub struct BackoffCommand<C> {
    inner: C,
    strategy: Mutex<Box<dyn DelayStrategy>>,
    interval: Mutex<Duration>,
}

impl<C: FallibleCommand> BackoffCommand<C> {
    /// Wraps `inner` with an arbitrary delay strategy.
    pub fn new(inner: C, strategy: Box<dyn DelayStrategy>) -> Self {
        Self {
            inner,
            strategy: Mutex::new(strategy),
            interval: Mutex::new(Duration::ZERO),
        }
    }

    /// Wraps `inner` with a plain exponential backoff between `min` and `max`.
    pub fn exponential(inner: C, min: Duration, max: Duration) -> Result<Self, ConfigError> {
        Ok(Self::new(inner, Box::new(ExponentialBackoff::new(min, max)?)))
    }

    /// Wraps `inner` with a randomized exponential backoff.
    pub fn randomized(
        inner: C,
        min: Duration,
        max: Duration,
        factor: f64,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            inner,
            Box::new(RandomizedExponentialBackoff::new(min, max, factor)?),
        ))
    }

    /// Number of failed attempts since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .consecutive_failures()
    }
}

#[async_trait]
impl<C: FallibleCommand> IntervalCommand for BackoffCommand<C> {
    fn separation_interval(&self) -> Duration {
        *self.interval.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute(&self, ctx: CancellationToken) -> Result<(), CommandError> {
        let succeeded = self.inner.try_execute(ctx).await?;
        let next = self
            .strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_delay(succeeded);
        *self.interval.lock().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }
}
