//! # LogWriter: renders events through `tracing`
//!
//! A subscriber that turns incoming [`Event`]s into structured `tracing` records.
//! Faults and escalations are logged at `warn`/`error`, lifecycle at `info`,
//! health pings at `debug`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  channel starting worker="V1StGXR8" attempt=0
//! INFO  channel ready worker="V1StGXR8" attempt=0
//! WARN  channel faulted worker="V1StGXR8" reason="worker exited with code 1"
//! WARN  restart scheduled worker="V1StGXR8" attempt=1 delay_ms=100
//! ERROR restart threshold exceeded, host shutdown requested worker="V1StGXR8" errors=3
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;
use async_trait::async_trait;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = e.worker.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ShutdownRequested => tracing::info!(seq = e.seq, "shutdown requested"),
            EventKind::AllStoppedWithin => tracing::info!(seq = e.seq, "all stopped within grace"),
            EventKind::GraceExceeded => tracing::error!(seq = e.seq, "grace exceeded"),
            EventKind::InvocationRejected => {
                tracing::warn!(seq = e.seq, reason, "invocation rejected")
            }
            EventKind::TimerFault => tracing::error!(seq = e.seq, reason, "periodic command faulted"),
            EventKind::WorkerHealthy => {
                tracing::debug!(seq = e.seq, worker, latency_ms = ?e.latency_ms, "worker healthy")
            }
            EventKind::WorkerUnhealthy => {
                tracing::warn!(seq = e.seq, worker, reason, "worker unhealthy")
            }
            EventKind::ChannelStarting => {
                tracing::info!(seq = e.seq, worker, attempt = ?e.attempt, "channel starting")
            }
            EventKind::ChannelReady => {
                tracing::info!(seq = e.seq, worker, attempt = ?e.attempt, "channel ready")
            }
            EventKind::ChannelFaulted => {
                tracing::warn!(seq = e.seq, worker, reason, "channel faulted")
            }
            EventKind::ChannelDisposed => tracing::info!(seq = e.seq, worker, "channel disposed"),
            EventKind::DispatcherStateChanged => {
                tracing::info!(seq = e.seq, transition = reason, "dispatcher state changed")
            }
            EventKind::RestartScheduled => tracing::warn!(
                seq = e.seq,
                worker,
                attempt = ?e.attempt,
                delay_ms = ?e.delay_ms,
                reason,
                "restart scheduled"
            ),
            EventKind::RestartThresholdExceeded => tracing::error!(
                seq = e.seq,
                worker,
                errors = ?e.attempt,
                reason,
                "restart threshold exceeded, host shutdown requested"
            ),
            EventKind::SubscriberOverflow => {
                tracing::warn!(seq = e.seq, subscriber = worker, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(seq = e.seq, subscriber = worker, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
