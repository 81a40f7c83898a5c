use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelConfig, FaultSink, HttpWorkerChannel, ProcessFactory, WorkerChannel};
use crate::events::Bus;

/// Creates worker channels for the dispatcher.
pub trait ChannelFactory: Send + Sync + 'static {
    /// Creates an unstarted channel reporting its faults on `faults`.
    ///
    /// `attempt` is 0 for the first channel and the error count for replacements.
    fn create(&self, attempt: u32, faults: FaultSink) -> Arc<dyn WorkerChannel>;
}

/// Produces [`HttpWorkerChannel`]s.
pub struct HttpChannelFactory {
    config: ChannelConfig,
    process: Arc<dyn ProcessFactory>,
    bus: Bus,
}

impl HttpChannelFactory {
    /// Creates a factory sharing one channel configuration and process launcher.
    pub fn new(config: ChannelConfig, process: Arc<dyn ProcessFactory>, bus: Bus) -> Self {
        Self {
            config,
            process,
            bus,
        }
    }
}

impl ChannelFactory for HttpChannelFactory {
    fn create(&self, attempt: u32, faults: FaultSink) -> Arc<dyn WorkerChannel> {
        Arc::new(HttpWorkerChannel::new(
            self.config.clone(),
            Arc::clone(&self.process),
            faults,
            self.bus.clone(),
            attempt,
        ))
    }
}

/// Lets the dispatcher ask the host to shut down.
pub trait HostLifetime: Send + Sync + 'static {
    /// Requests an orderly host shutdown. Must not block.
    fn stop_application(&self);
}

/// [`HostLifetime`] backed by a cancellation token.
#[derive(Debug, Clone, Default)]
pub struct TokenLifetime {
    token: CancellationToken,
}

impl TokenLifetime {
    /// Creates a lifetime that has not been stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled once a stop has been requested.
    pub fn stopping(&self) -> CancellationToken {
        self.token.clone()
    }

    /// `true` once a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl HostLifetime for TokenLifetime {
    fn stop_application(&self) {
        self.token.cancel();
    }
}
