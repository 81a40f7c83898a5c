//! # Invocation dispatch and worker supervision.
//!
//! - [`InvocationDispatcher`] routes invocations and replaces failed channels.
//! - [`ErrorWindow`] decides between restart and escalation.
//! - [`ChannelFactory`] / [`HostLifetime`] are the seams to channels and to the host.

mod config;
mod core;
mod factory;
mod state;
mod window;

pub use config::DispatcherConfig;
pub use core::{FunctionMetadata, InvocationDispatcher};
pub use factory::{ChannelFactory, HostLifetime, HttpChannelFactory, TokenLifetime};
pub use state::DispatcherState;
pub use window::ErrorWindow;
