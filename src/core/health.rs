//! # Worker health monitor.
//!
//! Pings the current worker through the dispatcher on an
//! [`IntervalSeparationTimer`]. A failed ping doubles the pause before the next
//! one (up to `max_interval`); a successful ping resets it.
//!
//! Results are published on the bus as `WorkerHealthy` / `WorkerUnhealthy`.
//! The monitor never restarts anything itself: process exits and broken
//! connections already reach the dispatcher through the fault path.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{DispatcherState, InvocationDispatcher};
use crate::error::{CommandError, ConfigError};
use crate::events::{Bus, Event, EventKind};
use crate::timer::{
    BackoffCommand, FallibleCommand, FaultHandler, IntervalSeparationTimer, PublishFault,
};

/// Health monitor settings.
///
/// `interval = 0s` disables the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Pause between pings while the worker is healthy.
    pub interval: Duration,
    /// Longest pause after repeated failures.
    pub max_interval: Duration,
}

impl HealthConfig {
    /// `false` when the monitor is disabled.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
        }
    }
}

struct WorkerPing {
    dispatcher: Weak<InvocationDispatcher>,
    bus: Bus,
}

#[async_trait]
impl FallibleCommand for WorkerPing {
    async fn try_execute(&self, ctx: CancellationToken) -> Result<bool, CommandError> {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return Err(CommandError::Canceled);
        };
        if dispatcher.state() != DispatcherState::Initialized {
            return Ok(true);
        }
        let worker = dispatcher.current_worker_id().unwrap_or_default();

        let status = select! {
            s = dispatcher.worker_status() => s,
            _ = ctx.cancelled() => return Err(CommandError::Canceled),
        };
        match status {
            Ok(status) => {
                self.bus.publish(
                    Event::new(EventKind::WorkerHealthy)
                        .with_worker(worker)
                        .with_latency(status.latency),
                );
                Ok(true)
            }
            Err(e) => {
                self.bus.publish(
                    Event::new(EventKind::WorkerUnhealthy)
                        .with_worker(worker)
                        .with_reason(e.to_string()),
                );
                Ok(false)
            }
        }
    }
}

/// Builds the (unstarted) health timer for `dispatcher`.
pub(crate) fn health_monitor(
    config: &HealthConfig,
    dispatcher: &Arc<InvocationDispatcher>,
    bus: Bus,
    faults: Arc<dyn FaultHandler>,
) -> Result<IntervalSeparationTimer, ConfigError> {
    let ping = WorkerPing {
        dispatcher: Arc::downgrade(dispatcher),
        bus: bus.clone(),
    };
    let command = BackoffCommand::exponential(ping, config.interval, config.max_interval)?;
    Ok(IntervalSeparationTimer::with_fault_handler(
        Arc::new(command),
        Arc::new(PublishFault::new(bus, faults)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{
        ChannelState, FaultSink, InvocationContext, InvocationResult, WorkerChannel, WorkerStatus,
    };
    use crate::dispatcher::{ChannelFactory, DispatcherConfig, FunctionMetadata, TokenLifetime};
    use crate::error::ChannelError;
    use crate::timer::AbortOnFault;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct PingChannel {
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WorkerChannel for PingChannel {
        fn id(&self) -> &str {
            "ping"
        }
        fn state(&self) -> ChannelState {
            ChannelState::Ready
        }
        async fn start(&self, _cancel: CancellationToken) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn invoke(&self, _ctx: InvocationContext) -> Result<InvocationResult, ChannelError> {
            Ok(InvocationResult::default())
        }
        async fn status(&self) -> Result<WorkerStatus, ChannelError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(WorkerStatus {
                    latency: Duration::from_millis(3),
                })
            } else {
                Err(ChannelError::Transport {
                    error: "timed out".into(),
                    connection_broken: false,
                })
            }
        }
        fn is_executing(&self, _invocation_id: &str) -> bool {
            false
        }
        fn dispose(&self) {}
    }

    struct PingFactory(Arc<AtomicBool>);

    impl ChannelFactory for PingFactory {
        fn create(&self, _attempt: u32, _faults: FaultSink) -> Arc<dyn WorkerChannel> {
            Arc::new(PingChannel {
                healthy: self.0.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_publishes_health_results() {
        let healthy = Arc::new(AtomicBool::new(false));
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let dispatcher = InvocationDispatcher::new(
            DispatcherConfig::default(),
            Arc::new(PingFactory(healthy.clone())),
            Arc::new(TokenLifetime::new()),
            bus.clone(),
        )
        .unwrap();
        dispatcher
            .initialize(vec![FunctionMetadata::new("f")])
            .await
            .unwrap();

        let cfg = HealthConfig {
            interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
        };
        let timer = health_monitor(&cfg, &dispatcher, bus.clone(), Arc::new(AbortOnFault)).unwrap();
        timer.start().unwrap();

        let mut saw_unhealthy = false;
        let mut saw_healthy = false;
        tokio::time::timeout(Duration::from_secs(2), async {
            while !(saw_unhealthy && saw_healthy) {
                let ev = rx.recv().await.unwrap();
                match ev.kind {
                    EventKind::WorkerUnhealthy => {
                        saw_unhealthy = true;
                        healthy.store(true, Ordering::SeqCst);
                    }
                    EventKind::WorkerHealthy => {
                        assert_eq!(ev.worker.as_deref(), Some("ping"));
                        saw_healthy = true;
                    }
                    _ => {}
                }
            }
        })
        .await
        .unwrap();

        timer.stop().await.unwrap();
        dispatcher.dispose();
    }

    #[test]
    fn test_zero_interval_disables_monitor() {
        let cfg = HealthConfig {
            interval: Duration::ZERO,
            ..HealthConfig::default()
        };
        assert!(!cfg.is_enabled());
        assert!(HealthConfig::default().is_enabled());
    }
}
