//! # Host: wires admission, dispatch, health checks and event delivery.
//!
//! The [`Host`] owns the event bus, the subscriber fan-out, the
//! [`InvocationDispatcher`], the [`AdmissionController`] and the optional health
//! monitor. It is built by [`HostBuilder`](crate::HostBuilder).
//!
//! ## High-level architecture
//! ```text
//! invoke(ctx) ──► AdmissionController::process ──► InvocationDispatcher::invoke ──► channel
//!
//! Event flow:
//!   channel/dispatcher/admission/health ── publish(Event) ──► Bus ──► listener ──► SubscriberSet
//!
//! run():
//!   start()  ── dispatcher.initialize(functions), health.start()
//!   wait for   OS signal  |  HostLifetime::stop_application (escalation)
//!   shutdown() ── Bus.publish(ShutdownRequested)
//!             ├─ stop health monitor
//!             ├─ wait up to `grace` for in-flight invocations
//!             │     ├─ drained  → Bus.publish(AllStoppedWithin)
//!             │     └─ timeout  → Bus.publish(GraceExceeded), RuntimeError::GraceExceeded
//!             ├─ dispatcher.dispose()
//!             └─ flush subscribers
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use workervisor::{FunctionMetadata, HostBuilder, HostConfig, InvocationContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = HostConfig::load("host.toml")?;
//!     let host = HostBuilder::new(cfg)
//!         .with_functions(vec![FunctionMetadata::new("hello")])
//!         .build()?;
//!
//!     host.start().await?;
//!     let out = host.invoke(InvocationContext::new("hello")).await;
//!     println!("{out:?}");
//!
//!     host.run().await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::admission::{Admission, AdmissionController};
use crate::channel::{InvocationContext, InvocationResult};
use crate::dispatcher::{DispatcherState, FunctionMetadata, InvocationDispatcher, TokenLifetime};
use crate::error::{DispatchError, RuntimeError, TimerError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::SubscriberSet;
use crate::timer::IntervalSeparationTimer;

use super::config::HostConfig;
use super::shutdown::ShutdownSignals;

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Outcome of [`Host::invoke`].
pub type InvocationOutcome = Admission<Result<InvocationResult, DispatchError>>;

/// Serves invocations through one supervised worker and shuts down gracefully.
pub struct Host {
    cfg: HostConfig,
    bus: Bus,
    dispatcher: Arc<InvocationDispatcher>,
    admission: AdmissionController,
    health: Option<IntervalSeparationTimer>,
    lifetime: TokenLifetime,
    functions: Vec<FunctionMetadata>,

    closing: AtomicBool,
    listener_stop: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Host {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        cfg: HostConfig,
        bus: Bus,
        subs: SubscriberSet,
        dispatcher: Arc<InvocationDispatcher>,
        admission: AdmissionController,
        health: Option<IntervalSeparationTimer>,
        lifetime: TokenLifetime,
        functions: Vec<FunctionMetadata>,
    ) -> Self {
        let listener_stop = CancellationToken::new();
        let listener = subscriber_listener(&bus, subs, listener_stop.clone());
        Self {
            cfg,
            bus,
            dispatcher,
            admission,
            health,
            lifetime,
            functions,
            closing: AtomicBool::new(false),
            listener_stop,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Event bus shared by every component.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The dispatcher, for admin operations and state inspection.
    pub fn dispatcher(&self) -> &Arc<InvocationDispatcher> {
        &self.dispatcher
    }

    /// Requests outstanding in the admission controller.
    pub fn outstanding(&self) -> usize {
        self.admission.outstanding()
    }

    /// Handle that stops [`run`](Host::run) when its `stop_application` is called.
    pub fn lifetime(&self) -> TokenLifetime {
        self.lifetime.clone()
    }

    /// Initializes the dispatcher and starts the health monitor.
    ///
    /// A worker that fails to come up is not an error here: the dispatcher keeps
    /// recovering through its fault path and escalates if it cannot.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        match self.dispatcher.initialize(self.functions.clone()).await {
            Ok(()) => {}
            Err(DispatchError::Channel(e)) => {
                tracing::warn!(error = %e, "initial worker channel failed to start");
            }
            Err(e) => return Err(e.into()),
        }
        if let Some(health) = &self.health {
            match health.start() {
                Ok(()) | Err(TimerError::AlreadyStarted) => {}
                Err(e) => tracing::warn!(error = %e, "health monitor not started"),
            }
        }
        Ok(())
    }

    /// Routes one invocation through admission control to the worker.
    pub async fn invoke(&self, ctx: InvocationContext) -> InvocationOutcome {
        if self.closing.load(Ordering::Acquire) {
            return Admission::Admitted(Err(DispatchError::NotReady {
                state: DispatcherState::Disposing,
            }));
        }
        let cancel = ctx.cancel.clone();
        let dispatcher = &self.dispatcher;
        self.admission
            .process(
                move |token| dispatcher.invoke(ctx.with_cancel(token)),
                cancel,
            )
            .await
    }

    /// Starts the host and blocks until an OS signal or a lifetime stop, then shuts down.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        self.start().await?;

        let mut signals = match ShutdownSignals::register() {
            Ok(signals) => signals,
            Err(e) => {
                let _ = self.shutdown_with("signal handler registration failed").await;
                return Err(e);
            }
        };

        let stopping = self.lifetime.stopping();
        let reason = select! {
            name = signals.recv() => format!("{name} received"),
            _ = stopping.cancelled() => "host stop requested".to_string(),
        };
        self.shutdown_with(&reason).await
    }

    /// Graceful shutdown. Idempotent; later calls return `Ok(())`.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.shutdown_with("shutdown requested").await
    }

    async fn shutdown_with(&self, reason: &str) -> Result<(), RuntimeError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(reason));
        self.lifetime.stopping().cancel();

        if let Some(health) = &self.health {
            let _ = health.stop().await;
        }

        let grace = self.cfg.grace;
        let drained = time::timeout(grace, self.drain()).await;
        self.dispatcher.dispose();

        let res = match drained {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_reason(format!("{} invocations in flight", self.outstanding())),
                );
                Err(RuntimeError::GraceExceeded { grace })
            }
        };
        self.flush_subscribers().await;
        res
    }

    async fn drain(&self) {
        while self.admission.outstanding() > 0 {
            time::sleep(DRAIN_POLL).await;
        }
    }

    async fn flush_subscribers(&self) {
        self.listener_stop.cancel();
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.listener_stop.cancel();
        self.dispatcher.dispose();
    }
}

/// Subscribes to the bus and forwards events to the subscriber set.
///
/// On stop, events already on the bus are forwarded and the set is flushed.
fn subscriber_listener(bus: &Bus, set: SubscriberSet, stop: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            select! {
                res = rx.recv() => match res {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = stop.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        set.emit(&ev);
                    }
                    break;
                }
            }
        }
        set.shutdown().await;
    })
}
