//! # Periodic background work.
//!
//! - [`IntervalSeparationTimer`] runs an [`IntervalCommand`] in a loop with a pause
//!   measured from the end of one execution to the start of the next.
//! - [`BackoffCommand`] makes that pause follow a [`DelayStrategy`](crate::DelayStrategy).
//! - [`FaultHandler`] decides what happens when a command fails unexpectedly.

mod command;
mod fault;
mod interval;

pub use command::{BackoffCommand, CommandFn, FallibleCommand, IntervalCommand};
pub use fault::{AbortOnFault, FaultHandler, PublishFault};
pub use interval::IntervalSeparationTimer;
