//! # workervisor
//!
//! **Workervisor** is the worker-facing core of a serverless functions host.
//!
//! It launches a language worker process, routes invocations to it over local
//! HTTP, replaces the worker when it fails, escalates to host shutdown when it
//! fails too often, and throttles inbound requests before they reach it.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!               invoke(ctx)
//!                    │
//!                    ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Host (runtime)                                                   │
//! │  - AdmissionController (queue limit, parallelism, overload probe) │
//! │  - InvocationDispatcher (state machine, ErrorWindow, restarts)    │
//! │  - health monitor (IntervalSeparationTimer + BackoffCommand)      │
//! │  - Bus + SubscriberSet (observability)                            │
//! └──────┬──────────────────────────────────────────────┬─────────────┘
//!        ▼                                              │ stop_application
//! ┌──────────────────────┐   FaultSink (mpsc)           ▼
//! │  HttpWorkerChannel   │ ──────────────► dispatcher fault listener
//! │  - worker process    │                   ├─ ErrorWindow.push
//! │  - readiness probe   │                   ├─ restart (after backoff)
//! │  - POST /{function}  │                   └─ threshold → host shutdown
//! └──────────────────────┘
//!        │ publish(Event)
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Bus (broadcast channel)                       │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                           subscriber_listener ──► SubscriberSet ──► on_event()
//! ```
//!
//! ### Restart lifecycle
//! ```text
//! Default ──initialize──► Initializing ──channel ready──► Initialized
//!                                                             │ fault
//!                                                             ▼
//!                                                  WorkerProcessRestarting
//!                          ┌──────────────────────────────────┤
//!                          │ errors in window < threshold     │ errors >= threshold
//!                          ▼                                  ▼
//!               sleep(backoff) → new channel        HostLifetime::stop_application
//!                          │
//!                          └──────► Initialized
//!
//! dispose() from any state ──► Disposing ──► Disposed
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                   |
//! |-------------------|--------------------------------------------------------------|------------------------------------------------------|
//! | **Timing**        | Fixed-gap periodic execution and adaptive delays.            | [`IntervalSeparationTimer`], [`DelayStrategy`]       |
//! | **Workers**       | Process launch, readiness, invocation transport.             | [`WorkerChannel`], [`HttpWorkerChannel`]             |
//! | **Dispatch**      | Routing, fault window, restart and escalation.               | [`InvocationDispatcher`], [`ErrorWindow`]            |
//! | **Admission**     | Bounded queue, parallelism limit, overload rejection.        | [`AdmissionController`], [`RejectionHandler`]        |
//! | **Runtime**       | Wiring, OS signals, graceful shutdown.                       | [`Host`], [`HostBuilder`], [`HostConfig`]            |
//! | **Subscriber API**| Observe lifecycle events (logging, metrics, custom sinks).   | [`Subscribe`], [`Event`]                             |
//! | **Errors**        | Typed errors with stable labels.                             | [`ConfigError`], [`ChannelError`], [`RuntimeError`]  |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (enabled by default).
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use workervisor::{CommandProcessFactory, FunctionMetadata, HostBuilder, HostConfig, Subscribe};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(workervisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn Subscribe>> = Vec::new();
//!
//!     let host = HostBuilder::new(HostConfig::default())
//!         .with_process_factory(Arc::new(CommandProcessFactory::new("node").arg("worker.js")))
//!         .with_functions(vec![FunctionMetadata::new("hello")])
//!         .with_subscribers(subs)
//!         .build()?;
//!
//!     host.run().await?;
//!     Ok(())
//! }
//! ```
mod admission;
mod channel;
mod core;
mod dispatcher;
mod error;
mod events;
mod policies;
mod subscribers;
mod timer;

// ---- Public re-exports ----

pub use admission::{
    Admission, AdmissionConfig, AdmissionController, NeverOverloaded, OverloadProbe,
    RejectReason, Rejection, RejectionHandler, StatusRejection,
};
pub use channel::{
    ChannelConfig, ChannelState, CommandProcessFactory, ENV_APP_ROOT, ENV_WORKER_ID,
    ENV_WORKER_PORT, ErrorEvent, FaultSink, HOST_VERSION, HOST_VERSION_HEADER,
    HttpWorkerChannel, INTENTIONAL_RESTART_EXIT_CODE, INVOCATION_ID_HEADER, InvocationContext,
    InvocationResult, LaunchSpec, ProcessExit, ProcessFactory, WorkerChannel, WorkerFaultKind,
    WorkerProcess, WorkerStatus,
};
pub use core::{HealthConfig, Host, HostBuilder, HostConfig, InvocationOutcome, WorkerCommand};
pub use dispatcher::{
    ChannelFactory, DispatcherConfig, DispatcherState, ErrorWindow, FunctionMetadata,
    HostLifetime, HttpChannelFactory, InvocationDispatcher, TokenLifetime,
};
pub use error::{ChannelError, CommandError, ConfigError, DispatchError, RuntimeError, TimerError};
pub use events::{Bus, Event, EventKind};
pub use policies::{
    BackoffPolicy, DelayStrategy, ExponentialBackoff, JitterPolicy, RandomizedExponentialBackoff,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use timer::{
    AbortOnFault, BackoffCommand, CommandFn, FallibleCommand, FaultHandler, IntervalCommand,
    IntervalSeparationTimer, PublishFault,
};

// Optional: expose the built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
