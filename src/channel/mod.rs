//! # Worker channels: one channel owns one worker process.
//!
//! - [`WorkerChannel`] the contract the dispatcher relies on.
//! - [`HttpWorkerChannel`] production channel: spawned process + local HTTP.
//! - [`ProcessFactory`] / [`CommandProcessFactory`] how processes are launched.
//! - [`FaultSink`] / [`ErrorEvent`] how faults reach the dispatcher.

mod fault;
mod http;
mod invocation;
mod process;
mod state;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;

pub use fault::{ErrorEvent, FaultSink, WorkerFaultKind};
pub use http::{ChannelConfig, HOST_VERSION, HOST_VERSION_HEADER, HttpWorkerChannel, INVOCATION_ID_HEADER};
pub use invocation::{InvocationContext, InvocationResult, WorkerStatus};
pub use process::{
    CommandProcessFactory, ENV_APP_ROOT, ENV_WORKER_ID, ENV_WORKER_PORT,
    INTENTIONAL_RESTART_EXIT_CODE, LaunchSpec, ProcessExit, ProcessFactory, WorkerProcess,
};
pub use state::ChannelState;

/// A connection to one worker process.
///
/// A channel is used once: after `Faulted` or `Disposed` it is replaced, never
/// restarted. Faults are reported on the [`FaultSink`] the channel was created
/// with, at most once per channel.
#[async_trait]
pub trait WorkerChannel: Send + Sync + 'static {
    /// Stable unique id.
    fn id(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> ChannelState;

    /// Launches the worker and waits until it accepts requests.
    async fn start(&self, cancel: CancellationToken) -> Result<(), ChannelError>;

    /// Sends one invocation. Only valid while `Ready`.
    async fn invoke(&self, ctx: InvocationContext) -> Result<InvocationResult, ChannelError>;

    /// Pings the worker.
    async fn status(&self) -> Result<WorkerStatus, ChannelError>;

    /// `true` while `invocation_id` is being executed by this channel.
    fn is_executing(&self, invocation_id: &str) -> bool;

    /// Releases the worker process. Idempotent, never blocks.
    fn dispose(&self);
}
