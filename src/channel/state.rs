//! Worker channel lifecycle.
//!
//! ```text
//! NotStarted ──► Starting ──► Ready
//!                   │           │
//!                   └────┬──────┘
//!                        ▼
//!                     Faulted
//!
//! any ──dispose──► Disposed   (terminal)
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a worker channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Created, process not launched yet.
    NotStarted,
    /// Process launched, waiting for readiness.
    Starting,
    /// Accepting invocations.
    Ready,
    /// Process exited or the connection broke. Terminal apart from `Disposed`.
    Faulted,
    /// Resources released. Terminal.
    Disposed,
}

impl ChannelState {
    fn as_u8(self) -> u8 {
        match self {
            ChannelState::NotStarted => 0,
            ChannelState::Starting => 1,
            ChannelState::Ready => 2,
            ChannelState::Faulted => 3,
            ChannelState::Disposed => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ChannelState::NotStarted,
            1 => ChannelState::Starting,
            2 => ChannelState::Ready,
            3 => ChannelState::Faulted,
            _ => ChannelState::Disposed,
        }
    }

    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelState::NotStarted => "not_started",
            ChannelState::Starting => "starting",
            ChannelState::Ready => "ready",
            ChannelState::Faulted => "faulted",
            ChannelState::Disposed => "disposed",
        }
    }
}

/// Lock-free cell holding a [`ChannelState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `to` if the current state is one of `from`.
    ///
    /// Returns the previous state on success.
    pub(crate) fn transition(&self, from: &[ChannelState], to: ChannelState) -> Option<ChannelState> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                from.contains(&ChannelState::from_u8(cur)).then_some(to.as_u8())
            })
            .ok()
            .map(ChannelState::from_u8)
    }

    /// Moves to `Disposed` unconditionally; returns `false` if it already was.
    pub(crate) fn dispose(&self) -> bool {
        self.0.swap(ChannelState::Disposed.as_u8(), Ordering::AcqRel) != ChannelState::Disposed.as_u8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChannelState::*;

    #[test]
    fn test_transition_respects_source_states() {
        let cell = StateCell::new(NotStarted);
        assert_eq!(cell.transition(&[Starting], Ready), None);
        assert_eq!(cell.transition(&[NotStarted], Starting), Some(NotStarted));
        assert_eq!(cell.transition(&[Starting], Ready), Some(Starting));
        assert_eq!(cell.get(), Ready);
    }

    #[test]
    fn test_disposed_is_terminal() {
        let cell = StateCell::new(Ready);
        assert!(cell.dispose());
        assert!(!cell.dispose());
        assert_eq!(cell.transition(&[Starting, Ready], Faulted), None);
        assert_eq!(cell.get(), Disposed);
    }
}
