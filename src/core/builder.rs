use std::sync::Arc;

use crate::admission::{AdmissionController, OverloadProbe, RejectionHandler};
use crate::channel::ProcessFactory;
use crate::dispatcher::{
    ChannelFactory, FunctionMetadata, HttpChannelFactory, InvocationDispatcher, TokenLifetime,
};
use crate::error::ConfigError;
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::timer::{AbortOnFault, FaultHandler};

use super::config::HostConfig;
use super::health::health_monitor;
use super::host::Host;

/// Builder for a [`Host`] with optional collaborators.
///
/// The worker comes from, in order of precedence: [`with_channel_factory`](Self::with_channel_factory),
/// [`with_process_factory`](Self::with_process_factory), then `HostConfig::worker`.
pub struct HostBuilder {
    cfg: HostConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    functions: Vec<FunctionMetadata>,
    channels: Option<Arc<dyn ChannelFactory>>,
    process: Option<Arc<dyn ProcessFactory>>,
    probe: Option<Arc<dyn OverloadProbe>>,
    rejection: Option<Arc<dyn RejectionHandler>>,
    faults: Option<Arc<dyn FaultHandler>>,
}

impl HostBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: HostConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            functions: Vec::new(),
            channels: None,
            process: None,
            probe: None,
            rejection: None,
            faults: None,
        }
    }

    /// Sets event subscribers.
    ///
    /// Each subscriber gets its own bounded queue and worker task.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Functions registered with the dispatcher on [`Host::start`].
    pub fn with_functions(mut self, functions: Vec<FunctionMetadata>) -> Self {
        self.functions = functions;
        self
    }

    /// Launches workers through `factory` over HTTP.
    pub fn with_process_factory(mut self, factory: Arc<dyn ProcessFactory>) -> Self {
        self.process = Some(factory);
        self
    }

    /// Replaces the whole channel construction.
    pub fn with_channel_factory(mut self, factory: Arc<dyn ChannelFactory>) -> Self {
        self.channels = Some(factory);
        self
    }

    /// Overload probe consulted by admission control.
    pub fn with_overload_probe(mut self, probe: Arc<dyn OverloadProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Builds rejection responses.
    pub fn with_rejection_handler(mut self, handler: Arc<dyn RejectionHandler>) -> Self {
        self.rejection = Some(handler);
        self
    }

    /// Receives unexpected health monitor failures (default: [`AbortOnFault`]).
    pub fn with_fault_handler(mut self, handler: Arc<dyn FaultHandler>) -> Self {
        self.faults = Some(handler);
        self
    }

    /// Validates the configuration and wires the host.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Arc<Host>, ConfigError> {
        self.cfg.validate()?;
        let bus = Bus::new(self.cfg.bus_capacity_clamped());

        let worker = self.cfg.worker.as_ref();
        let channels: Arc<dyn ChannelFactory> = match (self.channels, self.process, worker) {
            (Some(channels), _, _) => channels,
            (None, Some(process), _) => Arc::new(HttpChannelFactory::new(
                self.cfg.channel.clone(),
                process,
                bus.clone(),
            )),
            (None, None, Some(worker)) => Arc::new(HttpChannelFactory::new(
                self.cfg.channel.clone(),
                Arc::new(worker.process_factory()),
                bus.clone(),
            )),
            (None, None, None) => {
                return Err(ConfigError::OutOfRange {
                    field: "worker",
                    reason: "no worker command or factory configured",
                });
            }
        };

        let lifetime = TokenLifetime::new();
        let dispatcher = InvocationDispatcher::new(
            self.cfg.dispatcher.clone(),
            channels,
            Arc::new(lifetime.clone()),
            bus.clone(),
        )?;

        let mut admission = AdmissionController::new(self.cfg.admission.clone(), bus.clone());
        if let Some(probe) = self.probe {
            admission = admission.with_probe(probe);
        }
        if let Some(handler) = self.rejection {
            admission = admission.with_rejection_handler(handler);
        }

        let health = if self.cfg.health.is_enabled() {
            let faults = self.faults.unwrap_or_else(|| Arc::new(AbortOnFault));
            Some(health_monitor(
                &self.cfg.health,
                &dispatcher,
                bus.clone(),
                faults,
            )?)
        } else {
            None
        };

        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        Ok(Arc::new(Host::new_internal(
            self.cfg,
            bus,
            subs,
            dispatcher,
            admission,
            health,
            lifetime,
            self.functions,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkerCommand;
    use std::time::Duration;

    #[tokio::test]
    async fn test_build_requires_a_worker() {
        let err = HostBuilder::new(HostConfig::default()).build().err().unwrap();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                field: "worker",
                reason: "no worker command or factory configured",
            }
        );
    }

    #[tokio::test]
    async fn test_build_from_worker_command() {
        let cfg = HostConfig {
            worker: Some(WorkerCommand {
                program: "true".into(),
                ..WorkerCommand::default()
            }),
            ..HostConfig::default()
        };
        let host = HostBuilder::new(cfg).build().unwrap();
        assert_eq!(host.outstanding(), 0);
        assert!(host.dispatcher().current_worker_id().is_none());
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let mut cfg = HostConfig {
            worker: Some(WorkerCommand {
                program: "true".into(),
                ..WorkerCommand::default()
            }),
            ..HostConfig::default()
        };
        cfg.health.interval = Duration::from_secs(120);
        let err = HostBuilder::new(cfg).build().err().unwrap();
        assert_eq!(err.as_label(), "config_interval_order");
    }
}
