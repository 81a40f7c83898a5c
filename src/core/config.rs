//! # Host configuration.
//!
//! [`HostConfig`] aggregates the settings of every component the [`Host`](crate::Host)
//! wires together. It is a plain struct with `Default`; it can also be loaded from
//! TOML, where every duration is given in milliseconds:
//!
//! ```toml
//! grace_ms = 30000
//! bus_capacity = 1024
//!
//! [worker]
//! program = "node"
//! args = ["worker.js"]
//! env = { NODE_ENV = "production" }
//!
//! [channel]
//! app_root = "/srv/app"
//! initialization_timeout_ms = 60000
//! ping_timeout_ms = 5000
//!
//! [dispatcher]
//! error_events_threshold = 3
//! threshold_between_restarts_ms = 1800000
//! restart_min_ms = 1000
//! restart_max_ms = 30000
//!
//! [admission]
//! max_degree_of_parallelism = 4
//! max_queue_length = 100
//!
//! [health]
//! interval_ms = 10000
//! max_interval_ms = 60000
//! ```
//!
//! ## Sentinel values
//! - `grace = 0s` → dispose without waiting for in-flight invocations
//! - `channel.invocation_timeout_ms = 0` → no per-request timeout
//! - `health.interval_ms = 0` → health monitor disabled
//! - admission limits follow [`AdmissionConfig`]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::admission::AdmissionConfig;
use crate::channel::{ChannelConfig, CommandProcessFactory};
use crate::dispatcher::DispatcherConfig;
use crate::error::ConfigError;
use crate::policies::JitterPolicy;

use super::health::HealthConfig;

/// Command line used to launch worker processes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable to run.
    pub program: String,
    /// Arguments passed to it.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
}

impl WorkerCommand {
    /// Process factory launching this command.
    pub fn process_factory(&self) -> CommandProcessFactory {
        self.env.iter().fold(
            CommandProcessFactory::new(self.program.clone()).args(self.args.iter().cloned()),
            |f, (k, v)| f.env(k.clone(), v.clone()),
        )
    }
}

/// Settings of the whole host.
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Maximum time to wait for in-flight invocations on shutdown.
    pub grace: Duration,
    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
    /// Worker command; `None` requires a factory passed to the builder.
    pub worker: Option<WorkerCommand>,
    /// Worker channel settings.
    pub channel: ChannelConfig,
    /// Restart and escalation settings.
    pub dispatcher: DispatcherConfig,
    /// Admission limits.
    pub admission: AdmissionConfig,
    /// Health monitor settings.
    pub health: HealthConfig,
}

impl Default for HostConfig {
    /// `grace = 30s`, `bus_capacity = 1024`, no worker command, component defaults.
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            worker: None,
            channel: ChannelConfig::default(),
            dispatcher: DispatcherConfig::default(),
            admission: AdmissionConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl HostConfig {
    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatcher.validate()?;
        if self.health.is_enabled() && self.health.interval > self.health.max_interval {
            return Err(ConfigError::IntervalOrder {
                min: self.health.interval,
                max: self.health.max_interval,
            });
        }
        if self.channel.readiness_poll_interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                field: "channel.readiness_poll_interval_ms",
                reason: "must be greater than zero",
            });
        }
        if let Some(worker) = &self.worker {
            if worker.program.trim().is_empty() {
                return Err(ConfigError::OutOfRange {
                    field: "worker.program",
                    reason: "must not be empty",
                });
            }
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawHostConfig = toml::from_str(text).map_err(|e| ConfigError::Load {
            error: e.to_string(),
        })?;
        let cfg = raw.apply(Self::default())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads the TOML document at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            error: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawHostConfig {
    grace_ms: Option<i64>,
    bus_capacity: Option<usize>,
    worker: Option<RawWorker>,
    channel: RawChannel,
    dispatcher: RawDispatcher,
    admission: RawAdmission,
    health: RawHealth,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorker {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawChannel {
    port: Option<u16>,
    app_root: Option<PathBuf>,
    initialization_timeout_ms: Option<i64>,
    readiness_poll_interval_ms: Option<i64>,
    invocation_timeout_ms: Option<i64>,
    ping_timeout_ms: Option<i64>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawDispatcher {
    error_events_threshold: Option<usize>,
    threshold_between_restarts_ms: Option<i64>,
    restart_min_ms: Option<i64>,
    restart_max_ms: Option<i64>,
    restart_jitter: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawAdmission {
    max_degree_of_parallelism: Option<usize>,
    max_queue_length: Option<usize>,
    overload_check_interval_ms: Option<i64>,
    rejection_status: Option<u16>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawHealth {
    interval_ms: Option<i64>,
    max_interval_ms: Option<i64>,
}

fn millis(field: &'static str, value: i64) -> Result<Duration, ConfigError> {
    u64::try_from(value)
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::NegativeInterval { field, value })
}

/// Overwrites `slot` when `value` is present.
fn set_millis(
    slot: &mut Duration,
    field: &'static str,
    value: Option<i64>,
) -> Result<(), ConfigError> {
    if let Some(v) = value {
        *slot = millis(field, v)?;
    }
    Ok(())
}

impl RawHostConfig {
    fn apply(self, mut cfg: HostConfig) -> Result<HostConfig, ConfigError> {
        set_millis(&mut cfg.grace, "grace_ms", self.grace_ms)?;
        if let Some(cap) = self.bus_capacity {
            cfg.bus_capacity = cap;
        }
        cfg.worker = self.worker.map(|w| WorkerCommand {
            program: w.program,
            args: w.args,
            env: w.env,
        });

        let ch = self.channel;
        if ch.port.is_some() {
            cfg.channel.port = ch.port;
        }
        if let Some(root) = ch.app_root {
            cfg.channel.app_root = root;
        }
        set_millis(
            &mut cfg.channel.initialization_timeout,
            "channel.initialization_timeout_ms",
            ch.initialization_timeout_ms,
        )?;
        set_millis(
            &mut cfg.channel.readiness_poll_interval,
            "channel.readiness_poll_interval_ms",
            ch.readiness_poll_interval_ms,
        )?;
        if let Some(v) = ch.invocation_timeout_ms {
            let timeout = millis("channel.invocation_timeout_ms", v)?;
            cfg.channel.invocation_timeout = (!timeout.is_zero()).then_some(timeout);
        }
        set_millis(
            &mut cfg.channel.ping_timeout,
            "channel.ping_timeout_ms",
            ch.ping_timeout_ms,
        )?;

        let d = self.dispatcher;
        if let Some(n) = d.error_events_threshold {
            cfg.dispatcher.error_events_threshold = n;
        }
        set_millis(
            &mut cfg.dispatcher.threshold_between_restarts,
            "dispatcher.threshold_between_restarts_ms",
            d.threshold_between_restarts_ms,
        )?;
        set_millis(
            &mut cfg.dispatcher.restart_backoff.min,
            "dispatcher.restart_min_ms",
            d.restart_min_ms,
        )?;
        set_millis(
            &mut cfg.dispatcher.restart_backoff.max,
            "dispatcher.restart_max_ms",
            d.restart_max_ms,
        )?;
        if let Some(factor) = d.restart_jitter {
            cfg.dispatcher.restart_backoff.jitter = JitterPolicy::Proportional { factor };
        }

        let a = self.admission;
        if let Some(n) = a.max_degree_of_parallelism {
            cfg.admission.max_degree_of_parallelism = n;
        }
        if let Some(n) = a.max_queue_length {
            cfg.admission.max_queue_length = n;
        }
        set_millis(
            &mut cfg.admission.overload_check_interval,
            "admission.overload_check_interval_ms",
            a.overload_check_interval_ms,
        )?;
        if let Some(status) = a.rejection_status {
            cfg.admission.rejection_status = status;
        }

        set_millis(&mut cfg.health.interval, "health.interval_ms", self.health.interval_ms)?;
        set_millis(
            &mut cfg.health.max_interval,
            "health.max_interval_ms",
            self.health.max_interval_ms,
        )?;
        Ok(cfg)
    }
}
