//! Host runtime: wiring, configuration and lifecycle.
//!
//! The public API from this module is [`Host`] (built with [`HostBuilder`]) and its
//! configuration [`HostConfig`].
//!
//! Internal modules:
//! - [`host`]: invocation entry point, shutdown with grace, event fan-out;
//! - [`builder`]: assembles bus, subscribers, dispatcher, admission and health monitor;
//! - [`config`]: aggregated settings and TOML loading;
//! - [`health`]: periodic worker status ping;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod config;
mod health;
mod host;
mod shutdown;

pub use builder::HostBuilder;
pub use config::{HostConfig, WorkerCommand};
pub use health::HealthConfig;
pub use host::{Host, InvocationOutcome};
