//! # HttpWorkerChannel: a worker process reached over local HTTP.
//!
//! ```text
//! start(cancel)
//!   ├─► NotStarted → Starting, publish ChannelStarting
//!   ├─► ProcessFactory::launch(port, id, app root)
//!   ├─► spawn monitor ──► select! { process exits → fault, disposed → kill + reap }
//!   └─► poll GET / until any HTTP answer (or initialization timeout)
//!         └─► Starting → Ready, publish ChannelReady
//!
//! invoke(ctx)  → POST /{function} { data, metadata }  (Ready only)
//! status()     → GET / and measure the round trip
//! dispose()    → any → Disposed, kill the process once
//! ```
//!
//! A channel reports **at most one** fault on its [`FaultSink`]. After that it is
//! `Faulted` and stays so; the dispatcher replaces it.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::channel::fault::{ErrorEvent, FaultSink, WorkerFaultKind};
use crate::channel::invocation::{InvocationContext, InvocationRequest, InvocationResult, WorkerStatus};
use crate::channel::process::{LaunchSpec, ProcessFactory, WorkerProcess};
use crate::channel::state::{ChannelState, StateCell};
use crate::channel::WorkerChannel;
use crate::error::ChannelError;
use crate::events::{Bus, Event, EventKind};

/// Header carrying the invocation id.
pub const INVOCATION_ID_HEADER: &str = "x-workervisor-invocation-id";
/// Header carrying the host version.
pub const HOST_VERSION_HEADER: &str = "x-workervisor-host-version";
/// Host version sent to workers.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

const LOOPBACK: &str = "127.0.0.1";
/// Floor for a single readiness probe.
const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Settings shared by every channel the host creates.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Fixed worker port; `None` picks a free loopback port per channel.
    pub port: Option<u16>,
    /// Application root handed to the worker.
    pub app_root: PathBuf,
    /// Upper bound for the readiness wait.
    pub initialization_timeout: Duration,
    /// Pause between readiness probes.
    pub readiness_poll_interval: Duration,
    /// Per-request timeout for invocations (`None` = no timeout).
    pub invocation_timeout: Option<Duration>,
    /// Upper bound for one status ping.
    pub ping_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port: None,
            app_root: PathBuf::from("."),
            initialization_timeout: Duration::from_secs(60),
            readiness_poll_interval: Duration::from_millis(25),
            invocation_timeout: None,
            ping_timeout: Duration::from_secs(5),
        }
    }
}

struct Shared {
    id: Arc<str>,
    state: StateCell,
    faults: FaultSink,
    fault_reported: AtomicBool,
    bus: Bus,
}

impl Shared {
    /// Marks the channel faulted and reports it, at most once per channel.
    fn fault(&self, kind: WorkerFaultKind, message: String) {
        if self
            .state
            .transition(&[ChannelState::Starting, ChannelState::Ready], ChannelState::Faulted)
            .is_none()
        {
            return;
        }
        if self.fault_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.publish(
            Event::new(EventKind::ChannelFaulted)
                .with_worker(Arc::clone(&self.id))
                .with_reason(message.clone()),
        );
        self.faults.report(ErrorEvent::new(Arc::clone(&self.id), kind, message));
    }
}

/// Worker channel talking JSON over HTTP to a locally spawned process.
pub struct HttpWorkerChannel {
    shared: Arc<Shared>,
    attempt: u32,
    config: ChannelConfig,
    factory: Arc<dyn ProcessFactory>,
    client: reqwest::Client,
    port: AtomicU16,
    in_flight: Arc<Mutex<HashSet<String>>>,
    disposed: CancellationToken,
}

impl HttpWorkerChannel {
    /// Creates a channel; nothing is launched until [`start`](WorkerChannel::start).
    ///
    /// `attempt` is the restart attempt this channel belongs to (0 for the first).
    pub fn new(
        config: ChannelConfig,
        factory: Arc<dyn ProcessFactory>,
        faults: FaultSink,
        bus: Bus,
        attempt: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!("workervisor-host/{HOST_VERSION}"))
            .build()
            .unwrap_or_default();
        Self {
            shared: Arc::new(Shared {
                id: Arc::from(nanoid::nanoid!()),
                state: StateCell::new(ChannelState::NotStarted),
                faults,
                fault_reported: AtomicBool::new(false),
                bus,
            }),
            attempt,
            config,
            factory,
            client,
            port: AtomicU16::new(0),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            disposed: CancellationToken::new(),
        }
    }

    fn base_url(&self) -> String {
        format!("http://{LOOPBACK}:{}/", self.port.load(Ordering::Acquire))
    }

    async fn pick_port(&self) -> Result<u16, ChannelError> {
        if let Some(port) = self.config.port {
            return Ok(port);
        }
        let listener = tokio::net::TcpListener::bind((LOOPBACK, 0))
            .await
            .map_err(|e| ChannelError::Spawn {
                error: format!("no free port: {e}"),
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| ChannelError::Spawn {
                error: format!("no free port: {e}"),
            })?
            .port();
        Ok(port)
    }

    /// Polls the worker until it answers or the initialization timeout elapses.
    ///
    /// Each probe is bounded by the poll interval and raced against the deadline,
    /// so a worker that accepts connections but never answers still times out.
    async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), ChannelError> {
        let url = self.base_url();
        let deadline = time::sleep(self.config.initialization_timeout);
        tokio::pin!(deadline);
        let timed_out = || ChannelError::InitializationTimeout {
            timeout: self.config.initialization_timeout,
        };

        loop {
            if self.shared.state.get() != ChannelState::Starting {
                return Err(ChannelError::NotReady {
                    state: self.shared.state.get(),
                });
            }
            let probe = self
                .client
                .get(&url)
                .timeout(self.config.readiness_poll_interval.max(MIN_PROBE_TIMEOUT))
                .send();
            let answered = select! {
                r = probe => match r {
                    Ok(_) => true,
                    Err(e) if e.is_connect() || e.is_timeout() => {
                        tracing::debug!(worker = %self.shared.id, %url, error = %e, "waiting for worker to accept requests");
                        false
                    }
                    Err(_) => true,
                },
                _ = &mut deadline => return Err(timed_out()),
                _ = cancel.cancelled() => return Err(ChannelError::Canceled),
                _ = self.disposed.cancelled() => return Err(ChannelError::Canceled),
            };
            if answered {
                return Ok(());
            }
            select! {
                _ = time::sleep(self.config.readiness_poll_interval) => {}
                _ = &mut deadline => return Err(timed_out()),
                _ = cancel.cancelled() => return Err(ChannelError::Canceled),
                _ = self.disposed.cancelled() => return Err(ChannelError::Canceled),
            }
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ChannelError {
        let broken = e.is_connect();
        let err = ChannelError::Transport {
            error: e.to_string(),
            connection_broken: broken,
        };
        if broken {
            self.shared.fault(WorkerFaultKind::Error, err.to_string());
        }
        err
    }
}

#[async_trait]
impl WorkerChannel for HttpWorkerChannel {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn state(&self) -> ChannelState {
        self.shared.state.get()
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), ChannelError> {
        if self
            .shared
            .state
            .transition(&[ChannelState::NotStarted], ChannelState::Starting)
            .is_none()
        {
            return Err(ChannelError::NotReady {
                state: self.shared.state.get(),
            });
        }
        self.shared.bus.publish(
            Event::new(EventKind::ChannelStarting)
                .with_worker(Arc::clone(&self.shared.id))
                .with_attempt(self.attempt),
        );

        let launched = match self.pick_port().await {
            Ok(port) => {
                self.port.store(port, Ordering::Release);
                self.factory.launch(&LaunchSpec {
                    worker_id: Arc::clone(&self.shared.id),
                    port,
                    app_root: self.config.app_root.clone(),
                })
            }
            Err(e) => Err(e),
        };
        let process = match launched {
            Ok(p) => p,
            Err(e) => {
                self.shared.fault(WorkerFaultKind::Error, e.to_string());
                return Err(e);
            }
        };
        tokio::spawn(monitor(process, Arc::clone(&self.shared), self.disposed.clone()));

        match self.wait_ready(&cancel).await {
            Ok(()) => {}
            Err(ChannelError::Canceled) => return Err(ChannelError::Canceled),
            Err(e) => {
                if matches!(e, ChannelError::InitializationTimeout { .. }) {
                    self.shared.fault(WorkerFaultKind::Error, e.to_string());
                }
                return Err(e);
            }
        }

        match self
            .shared
            .state
            .transition(&[ChannelState::Starting], ChannelState::Ready)
        {
            Some(_) => {
                self.shared.bus.publish(
                    Event::new(EventKind::ChannelReady)
                        .with_worker(Arc::clone(&self.shared.id))
                        .with_attempt(self.attempt),
                );
                Ok(())
            }
            None => Err(ChannelError::NotReady {
                state: self.shared.state.get(),
            }),
        }
    }

    async fn invoke(&self, ctx: InvocationContext) -> Result<InvocationResult, ChannelError> {
        let state = self.shared.state.get();
        if state != ChannelState::Ready {
            return Err(ChannelError::NotReady { state });
        }
        let _in_flight = InFlight::enter(&self.in_flight, &ctx.invocation_id);

        let url = format!("{}{}", self.base_url(), ctx.function_name);
        let mut req = self
            .client
            .post(&url)
            .header(INVOCATION_ID_HEADER, &ctx.invocation_id)
            .header(HOST_VERSION_HEADER, HOST_VERSION)
            .json(&InvocationRequest {
                data: &ctx.inputs,
                metadata: &ctx.metadata,
            });
        if let Some(t) = self.config.invocation_timeout {
            req = req.timeout(t);
        }

        let resp = select! {
            r = req.send() => r.map_err(|e| self.transport_error(e))?,
            _ = ctx.cancel.cancelled() => return Err(ChannelError::Canceled),
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Protocol {
                status: status.as_u16(),
                error: body,
            });
        }
        let result: InvocationResult = resp.json().await.map_err(|e| ChannelError::Protocol {
            status: status.as_u16(),
            error: format!("invalid response body: {e}"),
        })?;

        let span = tracing::info_span!(
            "invocation",
            worker = %self.shared.id,
            function = %ctx.function_name,
            invocation_id = %ctx.invocation_id
        );
        let _entered = span.enter();
        for line in &result.logs {
            tracing::info!(target: "workervisor::function", "{line}");
        }
        Ok(result)
    }

    async fn status(&self) -> Result<WorkerStatus, ChannelError> {
        let started = time::Instant::now();
        let ping = self
            .client
            .get(self.base_url())
            .timeout(self.config.ping_timeout)
            .send();
        match ping.await {
            Ok(resp) => {
                tracing::debug!(worker = %self.shared.id, status = %resp.status(), "worker ping");
                Ok(WorkerStatus {
                    latency: started.elapsed(),
                })
            }
            Err(e) => Err(ChannelError::Transport {
                connection_broken: e.is_connect(),
                error: e.to_string(),
            }),
        }
    }

    fn is_executing(&self, invocation_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(invocation_id)
    }

    fn dispose(&self) {
        if !self.shared.state.dispose() {
            return;
        }
        self.disposed.cancel();
        self.shared
            .bus
            .publish(Event::new(EventKind::ChannelDisposed).with_worker(Arc::clone(&self.shared.id)));
    }
}

impl Drop for HttpWorkerChannel {
    fn drop(&mut self) {
        self.disposed.cancel();
    }
}

/// Owns the process: reports its exit, or kills it once the channel is disposed.
async fn monitor(mut process: Box<dyn WorkerProcess>, shared: Arc<Shared>, disposed: CancellationToken) {
    let pid = process.pid();
    select! {
        exit = process.wait() => {
            if shared.state.get() == ChannelState::Disposed {
                return;
            }
            let message = exit.describe(process.program());
            tracing::warn!(worker = %shared.id, ?pid, code = ?exit.code, "worker process exited");
            let kind = if exit.is_restart_request() {
                WorkerFaultKind::Restart
            } else {
                WorkerFaultKind::Error
            };
            shared.fault(kind, message);
        }
        _ = disposed.cancelled() => {
            process.kill().await;
            tracing::debug!(worker = %shared.id, ?pid, "worker process killed");
        }
    }
}

/// Registers an invocation id for the lifetime of the guard.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlight {
    fn enter(set: &Arc<Mutex<HashSet<String>>>, id: &str) -> Self {
        set.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        Self {
            set: Arc::clone(set),
            id: id.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
