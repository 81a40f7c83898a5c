//! Sliding window of recent worker errors.
//!
//! The window is a stack. A new event is compared with the **top** only: if the gap
//! exceeds the threshold, the whole stack is cleared before the push. Older events
//! are never expired individually.

use std::time::Duration;

use crate::channel::ErrorEvent;

/// Recent worker errors, newest last.
#[derive(Debug, Clone)]
pub struct ErrorWindow {
    events: Vec<ErrorEvent>,
    threshold_between: Duration,
}

impl ErrorWindow {
    /// Creates an empty window.
    pub fn new(threshold_between: Duration) -> Self {
        Self {
            events: Vec::new(),
            threshold_between,
        }
    }

    /// Records `event`, clearing the window first if it arrives too long after the top.
    pub fn push(&mut self, event: ErrorEvent) {
        let expired = self.events.last().is_some_and(|top| {
            event.created_at.saturating_duration_since(top.created_at) > self.threshold_between
        });
        if expired {
            tracing::debug!(dropped = self.events.len(), "error window reset");
            self.events.clear();
        }
        self.events.push(event);
    }

    /// Number of errors currently counted.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// `true` if no errors are counted.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Most recent error.
    pub fn top(&self) -> Option<&ErrorEvent> {
        self.events.last()
    }
}
