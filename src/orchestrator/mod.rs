//! Orchestration of the monitoring core
//!
//! - `controller`: the `Orchestrator` and its public operations
//! - `poller`: periodic activity sampling task
//! - `monitor`: per-session liveness watcher

mod controller;
mod monitor;
mod poller;

pub use controller::{Orchestrator, StatusSnapshot};
