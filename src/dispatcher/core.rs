//! # InvocationDispatcher: route invocations, supervise the worker channel.
//!
//! ```text
//!             invoke(ctx) ─► [state == Initialized?] ─► channel.invoke()
//!
//! channel ── FaultSink ──► fault listener (one task, sequential)
//!                              │
//!                              ├─► disposing? → ignore
//!                              ├─► Error → ErrorWindow.push
//!                              ├─► stale worker id? → ignore
//!                              └─► dispose_and_restart (under restart lock)
//!                                    ├─► state = WorkerProcessRestarting
//!                                    ├─► channel.dispose()
//!                                    ├─► window.len() >= threshold → HostLifetime::stop_application
//!                                    └─► sleep(restart_backoff) → new channel → start → Initialized
//! ```
//!
//! ## Rules
//! - Restart decisions are serialized: one listener task plus an async restart lock
//!   shared with the admin operations.
//! - The channel reference is only replaced after `WorkerProcessRestarting`.
//! - Once [`dispose`](InvocationDispatcher::dispose) has begun, faults are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tokio::sync::{mpsc, watch};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::channel::{
    ErrorEvent, FaultSink, InvocationContext, InvocationResult, WorkerChannel, WorkerFaultKind,
    WorkerStatus,
};
use crate::error::{ConfigError, DispatchError};
use crate::events::{Bus, Event, EventKind};

use super::{ChannelFactory, DispatcherConfig, DispatcherState, ErrorWindow, HostLifetime};

/// A function the host serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionMetadata {
    /// Function name; also the request path on the worker.
    pub name: String,
}

impl FunctionMetadata {
    /// Creates metadata for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Routes invocations to the current worker channel and replaces it when it fails.
pub struct InvocationDispatcher {
    config: DispatcherConfig,
    factory: Arc<dyn ChannelFactory>,
    lifetime: Arc<dyn HostLifetime>,
    bus: Bus,

    state: watch::Sender<DispatcherState>,
    channel: RwLock<Option<Arc<dyn WorkerChannel>>>,
    functions: RwLock<Vec<FunctionMetadata>>,
    window: Mutex<ErrorWindow>,

    restart_lock: tokio::sync::Mutex<()>,
    disposing: AtomicBool,
    shutdown: CancellationToken,
    faults: FaultSink,
}

impl InvocationDispatcher {
    /// Creates the dispatcher and spawns its fault listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: DispatcherConfig,
        factory: Arc<dyn ChannelFactory>,
        lifetime: Arc<dyn HostLifetime>,
        bus: Bus,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let (faults, rx) = FaultSink::channel();
        let (state, _) = watch::channel(DispatcherState::Default);

        let dispatcher = Arc::new(Self {
            window: Mutex::new(ErrorWindow::new(config.threshold_between_restarts)),
            config,
            factory,
            lifetime,
            bus,
            state,
            channel: RwLock::new(None),
            functions: RwLock::new(Vec::new()),
            restart_lock: tokio::sync::Mutex::new(()),
            disposing: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            faults,
        });
        tokio::spawn(listen(
            Arc::downgrade(&dispatcher),
            rx,
            dispatcher.shutdown.clone(),
        ));
        Ok(dispatcher)
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    /// Registered functions.
    pub fn functions(&self) -> Vec<FunctionMetadata> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of errors currently in the restart window.
    pub fn error_count(&self) -> usize {
        self.lock_window().len()
    }

    /// Registers functions and starts the first channel.
    ///
    /// With no functions the dispatcher stays `Default` and starts nothing.
    /// If the first channel fails to start, the error is returned and recovery
    /// continues through the regular fault path.
    pub async fn initialize(&self, functions: Vec<FunctionMetadata>) -> Result<(), DispatchError> {
        let state = self.state();
        if state != DispatcherState::Default || self.is_disposing() {
            return Err(DispatchError::NotReady { state });
        }
        if functions.is_empty() {
            tracing::debug!("no functions registered, dispatcher stays idle");
            return Ok(());
        }
        *self
            .functions
            .write()
            .unwrap_or_else(PoisonError::into_inner) = functions;

        let _guard = self.restart_lock.lock().await;
        self.set_state(DispatcherState::Initializing);
        self.start_channel(0).await
    }

    /// Sends an invocation to the current channel.
    pub async fn invoke(&self, ctx: InvocationContext) -> Result<InvocationResult, DispatchError> {
        let channel = self.ready_channel()?;
        Ok(channel.invoke(ctx).await?)
    }

    /// Pings the current channel.
    pub async fn worker_status(&self) -> Result<WorkerStatus, DispatchError> {
        let channel = self.ready_channel()?;
        Ok(channel.status().await?)
    }

    /// Id of the current channel, if any.
    pub fn current_worker_id(&self) -> Option<String> {
        self.current().map(|ch| ch.id().to_string())
    }

    /// Disposes the current channel and starts a replacement.
    pub async fn restart_all_workers(&self) {
        let _guard = self.restart_lock.lock().await;
        if self.is_disposing() {
            return;
        }
        if let Some(channel) = self.current() {
            self.dispose_and_restart(channel, "restart of all workers requested")
                .await;
        }
    }

    /// Restarts the channel executing `invocation_id`.
    ///
    /// Returns `false` if no channel is executing it.
    pub async fn restart_worker_with_invocation_id(&self, invocation_id: &str) -> bool {
        let _guard = self.restart_lock.lock().await;
        if self.is_disposing() {
            return false;
        }
        match self.current() {
            Some(channel) if channel.is_executing(invocation_id) => {
                let reason = format!("restart requested for invocation {invocation_id}");
                self.dispose_and_restart(channel, &reason).await;
                true
            }
            _ => false,
        }
    }

    /// Shuts down: ignores further faults, disposes the channel. Idempotent.
    pub fn dispose(&self) {
        if self.disposing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_state(DispatcherState::Disposing);
        self.shutdown.cancel();
        let channel = self
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(channel) = channel {
            channel.dispose();
        }
        self.set_state(DispatcherState::Disposed);
    }

    async fn handle_fault(&self, fault: ErrorEvent) {
        if self.is_disposing() {
            return;
        }
        let _guard = self.restart_lock.lock().await;
        if self.is_disposing() {
            return;
        }

        if fault.kind == WorkerFaultKind::Error {
            self.lock_window().push(fault.clone());
        }
        tracing::debug!(
            worker = %fault.worker_id,
            kind = ?fault.kind,
            errors = self.error_count(),
            message = %fault.message,
            "handling worker fault"
        );

        match self.current() {
            Some(channel) if channel.id() == &*fault.worker_id => {
                self.dispose_and_restart(channel, &fault.message).await;
            }
            _ => {
                tracing::debug!(worker = %fault.worker_id, "fault from a worker that is no longer current");
            }
        }
    }

    /// Must be called with the restart lock held.
    async fn dispose_and_restart(&self, channel: Arc<dyn WorkerChannel>, reason: &str) {
        let errors = self.error_count();
        self.set_state(DispatcherState::WorkerProcessRestarting);
        channel.dispose();
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = None;

        if errors >= self.config.error_events_threshold {
            tracing::error!(
                worker = channel.id(),
                errors,
                "exceeded worker restart retry count, shutting down the host to recover"
            );
            self.bus.publish(
                Event::new(EventKind::RestartThresholdExceeded)
                    .with_worker(channel.id())
                    .with_attempt(errors as u32)
                    .with_reason(reason),
            );
            self.lifetime.stop_application();
            return;
        }

        let attempt = errors as u32;
        let delay = self.config.restart_backoff.delay(attempt);
        self.bus.publish(
            Event::new(EventKind::RestartScheduled)
                .with_worker(channel.id())
                .with_attempt(attempt)
                .with_delay(delay)
                .with_reason(reason),
        );

        select! {
            _ = time::sleep(delay) => {}
            _ = self.shutdown.cancelled() => return,
        }
        if self.is_disposing() {
            return;
        }
        if let Err(e) = self.start_channel(attempt).await {
            tracing::warn!(error = %e, attempt, "replacement worker failed to start");
        }
    }

    /// Creates, installs and starts a channel. Must be called with the restart lock held.
    async fn start_channel(&self, attempt: u32) -> Result<(), DispatchError> {
        let channel = self.factory.create(attempt, self.faults.clone());
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&channel));

        let result = channel.start(self.shutdown.child_token()).await;
        if self.is_disposing() {
            channel.dispose();
            return Err(DispatchError::NotReady {
                state: self.state(),
            });
        }
        result?;

        let state = self.state();
        if matches!(
            state,
            DispatcherState::Initializing | DispatcherState::WorkerProcessRestarting
        ) {
            self.set_state(DispatcherState::Initialized);
        }
        Ok(())
    }

    fn ready_channel(&self) -> Result<Arc<dyn WorkerChannel>, DispatchError> {
        let state = self.state();
        if state != DispatcherState::Initialized {
            return Err(DispatchError::NotReady { state });
        }
        self.current().ok_or(DispatchError::NotReady { state })
    }

    fn current(&self) -> Option<Arc<dyn WorkerChannel>> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, next: DispatcherState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            self.bus.publish(
                Event::new(EventKind::DispatcherStateChanged)
                    .with_reason(format!("{} -> {}", prev.as_label(), next.as_label())),
            );
        }
    }

    fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::Acquire)
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, ErrorWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for InvocationDispatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Processes faults one at a time until the dispatcher is disposed or dropped.
async fn listen(
    dispatcher: Weak<InvocationDispatcher>,
    mut rx: mpsc::UnboundedReceiver<ErrorEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let fault = select! {
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };
        let Some(dispatcher) = dispatcher.upgrade() else { break };
        dispatcher.handle_fault(fault).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use crate::dispatcher::TokenLifetime;
    use crate::error::ChannelError;
    use crate::policies::BackoffPolicy;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Channel that starts instantly and faults on demand.
    struct FakeChannel {
        id: String,
        state: Mutex<ChannelState>,
        faults: FaultSink,
        executing: Mutex<HashSet<String>>,
        fail_start: bool,
    }

    impl FakeChannel {
        fn crash(&self) {
            *self.state.lock().unwrap() = ChannelState::Faulted;
            self.faults
                .report(ErrorEvent::new(self.id.as_str(), WorkerFaultKind::Error, "crashed"));
        }
    }

    #[async_trait]
    impl WorkerChannel for FakeChannel {
        fn id(&self) -> &str {
            &self.id
        }
        fn state(&self) -> ChannelState {
            *self.state.lock().unwrap()
        }
        async fn start(&self, _cancel: CancellationToken) -> Result<(), ChannelError> {
            if self.fail_start {
                *self.state.lock().unwrap() = ChannelState::Faulted;
                self.faults
                    .report(ErrorEvent::new(self.id.as_str(), WorkerFaultKind::Error, "spawn"));
                return Err(ChannelError::Spawn {
                    error: "spawn".into(),
                });
            }
            *self.state.lock().unwrap() = ChannelState::Ready;
            Ok(())
        }
        async fn invoke(&self, ctx: InvocationContext) -> Result<InvocationResult, ChannelError> {
            Ok(InvocationResult {
                return_value: Some(serde_json::json!(ctx.function_name)),
                ..InvocationResult::default()
            })
        }
        async fn status(&self) -> Result<WorkerStatus, ChannelError> {
            Ok(WorkerStatus {
                latency: Duration::from_millis(1),
            })
        }
        fn is_executing(&self, invocation_id: &str) -> bool {
            self.executing.lock().unwrap().contains(invocation_id)
        }
        fn dispose(&self) {
            *self.state.lock().unwrap() = ChannelState::Disposed;
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        created: Mutex<Vec<(u32, Arc<FakeChannel>)>>,
        seq: AtomicU32,
        fail_start: bool,
    }

    impl FakeFactory {
        fn last(&self) -> Arc<FakeChannel> {
            self.created.lock().unwrap().last().unwrap().1.clone()
        }
        fn attempts(&self) -> Vec<u32> {
            self.created.lock().unwrap().iter().map(|(a, _)| *a).collect()
        }
    }

    impl ChannelFactory for FakeFactory {
        fn create(&self, attempt: u32, faults: FaultSink) -> Arc<dyn WorkerChannel> {
            let ch = Arc::new(FakeChannel {
                id: format!("ch-{}", self.seq.fetch_add(1, Ordering::SeqCst)),
                state: Mutex::new(ChannelState::NotStarted),
                faults,
                executing: Mutex::new(HashSet::new()),
                fail_start: self.fail_start,
            });
            self.created.lock().unwrap().push((attempt, ch.clone()));
            ch
        }
    }

    fn config(threshold: usize) -> DispatcherConfig {
        DispatcherConfig {
            error_events_threshold: threshold,
            threshold_between_restarts: Duration::from_secs(60),
            restart_backoff: BackoffPolicy::constant(Duration::from_millis(1)),
        }
    }

    async fn wait_for(d: &InvocationDispatcher, want: DispatcherState) {
        let mut rx = d.watch_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[tokio::test]
    async fn test_initialize_without_functions_stays_default() {
        let factory = Arc::new(FakeFactory::default());
        let d = InvocationDispatcher::new(
            config(3),
            factory.clone(),
            Arc::new(TokenLifetime::new()),
            Bus::new(64),
        )
        .unwrap();

        d.initialize(vec![]).await.unwrap();
        assert_eq!(d.state(), DispatcherState::Default);
        assert!(factory.created.lock().unwrap().is_empty());

        let err = d.invoke(InvocationContext::new("f")).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::NotReady {
                state: DispatcherState::Default
            }
        ));
    }

    #[tokio::test]
    async fn test_initialize_then_invoke() {
        let factory = Arc::new(FakeFactory::default());
        let d = InvocationDispatcher::new(
            config(3),
            factory.clone(),
            Arc::new(TokenLifetime::new()),
            Bus::new(64),
        )
        .unwrap();

        d.initialize(vec![FunctionMetadata::new("hello")]).await.unwrap();
        assert_eq!(d.state(), DispatcherState::Initialized);
        assert_eq!(d.functions(), vec![FunctionMetadata::new("hello")]);

        let res = d.invoke(InvocationContext::new("hello")).await.unwrap();
        assert_eq!(res.return_value, Some(serde_json::json!("hello")));
        assert!(d.worker_status().await.is_ok());

        let again = d.initialize(vec![FunctionMetadata::new("x")]).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_threshold_three_restarts_twice_then_shuts_down() {
        let factory = Arc::new(FakeFactory::default());
        let lifetime = TokenLifetime::new();
        let d = InvocationDispatcher::new(
            config(3),
            factory.clone(),
            Arc::new(lifetime.clone()),
            Bus::new(64),
        )
        .unwrap();
        d.initialize(vec![FunctionMetadata::new("f")]).await.unwrap();

        for expected_channels in [2, 3] {
            factory.last().crash();
            tokio::time::timeout(Duration::from_secs(2), async {
                while factory.created.lock().unwrap().len() < expected_channels
                    || d.state() != DispatcherState::Initialized
                {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            })
            .await
            .unwrap();
            assert!(!lifetime.is_stopping());
        }
        assert_eq!(factory.attempts(), vec![0, 1, 2]);

        let last = factory.last();
        last.crash();
        tokio::time::timeout(Duration::from_secs(2), lifetime.stopping().cancelled())
            .await
            .unwrap();

        assert_eq!(factory.created.lock().unwrap().len(), 3);
        assert_eq!(last.state(), ChannelState::Disposed);
        assert_eq!(d.error_count(), 3);
        assert_eq!(d.state(), DispatcherState::WorkerProcessRestarting);
    }

    #[tokio::test]
    async fn test_restart_fault_does_not_count_as_error() {
        let factory = Arc::new(FakeFactory::default());
        let d = InvocationDispatcher::new(
            config(1),
            factory.clone(),
            Arc::new(TokenLifetime::new()),
            Bus::new(64),
        )
        .unwrap();
        d.initialize(vec![FunctionMetadata::new("f")]).await.unwrap();

        let first = factory.last();
        d.faults
            .report(ErrorEvent::new(first.id.as_str(), WorkerFaultKind::Restart, "exit 200"));
        tokio::time::timeout(Duration::from_secs(2), async {
            while factory.created.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        wait_for(&d, DispatcherState::Initialized).await;
        assert_eq!(d.error_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_fault_is_counted_but_not_restarted() {
        let factory = Arc::new(FakeFactory::default());
        let d = InvocationDispatcher::new(
            config(5),
            factory.clone(),
            Arc::new(TokenLifetime::new()),
            Bus::new(64),
        )
        .unwrap();
        d.initialize(vec![FunctionMetadata::new("f")]).await.unwrap();

        d.faults
            .report(ErrorEvent::new("someone-else", WorkerFaultKind::Error, "late"));
        tokio::time::timeout(Duration::from_secs(1), async {
            while d.error_count() == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(factory.created.lock().unwrap().len(), 1);
        assert_eq!(d.state(), DispatcherState::Initialized);
    }

    #[tokio::test]
    async fn test_faults_after_dispose_are_ignored() {
        let factory = Arc::new(FakeFactory::default());
        let lifetime = TokenLifetime::new();
        let d = InvocationDispatcher::new(
            config(1),
            factory.clone(),
            Arc::new(lifetime.clone()),
            Bus::new(64),
        )
        .unwrap();
        d.initialize(vec![FunctionMetadata::new("f")]).await.unwrap();
        let ch = factory.last();

        d.dispose();
        d.dispose();
        assert_eq!(d.state(), DispatcherState::Disposed);
        assert_eq!(ch.state(), ChannelState::Disposed);

        ch.crash();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(d.error_count(), 0);
        assert!(!lifetime.is_stopping());
        assert_eq!(factory.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_restarts() {
        let factory = Arc::new(FakeFactory::default());
        let d = InvocationDispatcher::new(
            config(3),
            factory.clone(),
            Arc::new(TokenLifetime::new()),
            Bus::new(64),
        )
        .unwrap();
        d.initialize(vec![FunctionMetadata::new("f")]).await.unwrap();

        assert!(!d.restart_worker_with_invocation_id("nope").await);

        factory
            .last()
            .executing
            .lock()
            .unwrap()
            .insert("inv-1".to_string());
        assert!(d.restart_worker_with_invocation_id("inv-1").await);
        assert_eq!(factory.created.lock().unwrap().len(), 2);
        assert_eq!(d.state(), DispatcherState::Initialized);

        d.restart_all_workers().await;
        assert_eq!(factory.created.lock().unwrap().len(), 3);
        assert_eq!(d.current_worker_id().as_deref(), Some("ch-2"));
    }

    #[tokio::test]
    async fn test_failed_initial_start_recovers_through_fault_path() {
        let factory = Arc::new(FakeFactory {
            fail_start: true,
            ..FakeFactory::default()
        });
        let lifetime = TokenLifetime::new();
        let d = InvocationDispatcher::new(
            config(2),
            factory.clone(),
            Arc::new(lifetime.clone()),
            Bus::new(64),
        )
        .unwrap();

        let err = d.initialize(vec![FunctionMetadata::new("f")]).await.unwrap_err();
        assert_eq!(err.as_label(), "channel_spawn_failed");

        tokio::time::timeout(Duration::from_secs(2), lifetime.stopping().cancelled())
            .await
            .unwrap();
        assert_eq!(factory.attempts(), vec![0, 1]);
    }
}
