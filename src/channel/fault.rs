//! # Worker faults and the sink that carries them to the dispatcher.
//!
//! Each channel receives a [`FaultSink`] at creation. Reporting is fire-and-forget:
//! the send never blocks and never fails the caller, even if the dispatcher is gone.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the dispatcher should make of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerFaultKind {
    /// Unexpected failure: process crash, broken connection, start failure.
    Error,
    /// The worker asked to be restarted (intentional-restart exit code).
    Restart,
}

/// One worker failure, as recorded in the dispatcher's error window.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Channel that reported the fault.
    pub worker_id: Arc<str>,
    /// Fault classification.
    pub kind: WorkerFaultKind,
    /// Human-readable description.
    pub message: String,
    /// When the fault was observed.
    pub created_at: Instant,
}

impl ErrorEvent {
    /// Creates an event stamped with the current time.
    pub fn new(worker_id: impl Into<Arc<str>>, kind: WorkerFaultKind, message: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            kind,
            message: message.into(),
            created_at: Instant::now(),
        }
    }
}

/// Sending half of the fault channel.
#[derive(Debug, Clone)]
pub struct FaultSink {
    tx: mpsc::UnboundedSender<ErrorEvent>,
}

impl FaultSink {
    /// Creates a connected sink/receiver pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ErrorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Reports a fault. Dropped silently when the receiver is gone.
    pub fn report(&self, event: ErrorEvent) {
        let _ = self.tx.send(event);
    }
}
