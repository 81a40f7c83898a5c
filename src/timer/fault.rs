//! # Fault routing for periodic commands.
//!
//! A command that fails with anything other than [`CommandError::Canceled`] (or panics)
//! is a bug in background work. The timer hands such faults to a [`FaultHandler`]
//! instead of swallowing them. The default, [`AbortOnFault`], treats them as fatal.

use std::sync::Arc;

use crate::error::CommandError;
use crate::events::{Bus, Event, EventKind};

/// Receives unexpected failures of periodic commands.
pub trait FaultHandler: Send + Sync + 'static {
    /// Handles one fault. Called from the timer's loop task.
    fn dispatch(&self, fault: CommandError);
}

/// Logs the fault and aborts the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnFault;

impl FaultHandler for AbortOnFault {
    fn dispatch(&self, fault: CommandError) {
        tracing::error!(error = %fault, label = fault.as_label(), "unhandled fault in periodic command");
        std::process::abort();
    }
}

/// Publishes the fault on the bus, then delegates to another handler.
pub struct PublishFault {
    bus: Bus,
    next: Arc<dyn FaultHandler>,
}

impl PublishFault {
    /// Wraps `next` so that every fault is also visible to subscribers.
    pub fn new(bus: Bus, next: Arc<dyn FaultHandler>) -> Self {
        Self { bus, next }
    }
}

impl FaultHandler for PublishFault {
    fn dispatch(&self, fault: CommandError) {
        self.bus
            .publish(Event::new(EventKind::TimerFault).with_reason(fault.to_string()));
        self.next.dispatch(fault);
    }
}
