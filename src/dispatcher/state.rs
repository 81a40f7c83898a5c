/// Dispatcher lifecycle.
///
/// ```text
/// Default ──initialize──► Initializing ──► Initialized ◄──┐
///                              │                │          │ replacement ready
///                              └──── fault ─────┴─► WorkerProcessRestarting
///
/// any ──dispose──► Disposing ──► Disposed
/// ```
///
/// `Default` means no functions were registered: no channel, nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DispatcherState {
    /// Idle; nothing registered.
    #[default]
    Default,
    /// First channel is starting.
    Initializing,
    /// A ready channel is serving invocations.
    Initialized,
    /// The channel was lost; a replacement is being prepared.
    WorkerProcessRestarting,
    /// Shutdown in progress.
    Disposing,
    /// Shut down.
    Disposed,
}

impl DispatcherState {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatcherState::Default => "default",
            DispatcherState::Initializing => "initializing",
            DispatcherState::Initialized => "initialized",
            DispatcherState::WorkerProcessRestarting => "worker_process_restarting",
            DispatcherState::Disposing => "disposing",
            DispatcherState::Disposed => "disposed",
        }
    }

    /// `true` for `Disposing` and `Disposed`.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, DispatcherState::Disposing | DispatcherState::Disposed)
    }
}
