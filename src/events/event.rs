//! # Runtime events emitted by channels, the dispatcher and the host.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Channel events**: worker channel lifecycle (starting, ready, faulted, disposed)
//! - **Dispatcher events**: state transitions, restart scheduling, escalation
//! - **Host events**: shutdown, admission rejections, health checks, timer faults
//! - **Subscriber events**: overflow and panics inside subscribers
//!
//! The [`Event`] struct carries additional metadata such as timestamps, worker id,
//! reasons, and delays.
//!
//! Events are **observability only**. Control decisions (restart, escalate) never
//! depend on bus delivery; channels report faults to the dispatcher through an
//! explicit [`FaultSink`](crate::FaultSink).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use workervisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RestartScheduled)
//!     .with_worker("w-1")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_millis(200));
//!
//! assert_eq!(ev.kind, EventKind::RestartScheduled);
//! assert_eq!(ev.worker.as_deref(), Some("w-1"));
//! assert_eq!(ev.delay_ms, Some(200));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `worker` (subscriber name), `reason` (panic info).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `worker` (subscriber name), `reason` ("full" / "closed").
    SubscriberOverflow,

    // === Host events ===
    /// Shutdown requested (OS signal or host lifetime stop).
    ShutdownRequested,

    /// Dispatcher and channels were disposed within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded during shutdown.
    GraceExceeded,

    /// A request was rejected by the admission controller.
    ///
    /// Sets: `reason` (queue full / host overloaded).
    InvocationRejected,

    /// A periodic command failed unexpectedly and was handed to the fault handler.
    ///
    /// Sets: `reason` (error message).
    TimerFault,

    /// The worker answered a health ping.
    ///
    /// Sets: `worker`, `latency_ms`.
    WorkerHealthy,

    /// A health ping failed.
    ///
    /// Sets: `reason`.
    WorkerUnhealthy,

    // === Channel events ===
    /// Worker process is being launched.
    ///
    /// Sets: `worker`, `attempt` (restart attempt, 0 for the initial channel).
    ChannelStarting,

    /// Worker answered the readiness probe.
    ///
    /// Sets: `worker`, `attempt`.
    ChannelReady,

    /// Channel faulted (process exit, readiness timeout, broken transport).
    ///
    /// Sets: `worker`, `reason`.
    ChannelFaulted,

    /// Channel was disposed and its process released.
    ///
    /// Sets: `worker`.
    ChannelDisposed,

    // === Dispatcher events ===
    /// Dispatcher moved to a new state.
    ///
    /// Sets: `reason` (`"From -> To"`).
    DispatcherStateChanged,

    /// A replacement channel will be started after `delay`.
    ///
    /// Sets: `worker` (failed worker), `attempt`, `delay_ms`, `reason`.
    RestartScheduled,

    /// Too many faults inside the restart window; host shutdown was requested.
    ///
    /// Sets: `worker`, `attempt` (window size), `reason`.
    RestartThresholdExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Worker (channel) id, if applicable.
    pub worker: Option<Arc<str>>,
    /// Human-readable reason (errors, transitions, overflow details).
    pub reason: Option<Arc<str>>,
    /// Restart attempt or window size.
    pub attempt: Option<u32>,
    /// Delay before the next action in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Round-trip latency in milliseconds (compact).
    pub latency_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            latency_ms: None,
        }
    }

    /// Attaches a worker id.
    #[inline]
    pub fn with_worker(mut self, worker: impl Into<Arc<str>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a latency (stored as milliseconds).
    #[inline]
    pub fn with_latency(mut self, d: Duration) -> Self {
        self.latency_ms = Some(compact_ms(d));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_worker(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_worker(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

#[inline]
fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
