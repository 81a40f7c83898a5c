//! # Admission control for inbound invocations.
//!
//! [`AdmissionController`] bounds outstanding requests and concurrent execution,
//! rejecting the excess immediately instead of letting it pile up.
//! The overload check and the rejection response are pluggable through
//! [`OverloadProbe`] and [`RejectionHandler`].

mod config;
mod controller;
mod rejection;

pub use config::AdmissionConfig;
pub use controller::{Admission, AdmissionController};
pub use rejection::{
    NeverOverloaded, OverloadProbe, RejectReason, Rejection, RejectionHandler, StatusRejection,
};
