//! sparkctl controller: assigns a stable application id to every
//! SparkApplication it observes.
//!
//! [`Controller`] wires a store client to the informer from
//! `sparkctl-store` and runs [`AppReconciler`] as its event handler.

#![forbid(unsafe_code)]

mod config;
mod controller;
mod error;
mod reconciler;

pub use config::ControllerConfig;
pub use controller::{Controller, Shutdown};
pub use error::ControllerError;
pub use reconciler::{AddOutcome, AppReconciler};
