//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by worker channels, the
//! dispatcher, the admission controller and the host.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `HttpWorkerChannel`, `InvocationDispatcher`, `AdmissionController`,
//!   `Host` (shutdown, health monitor), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Host::subscriber_listener()` fans out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
