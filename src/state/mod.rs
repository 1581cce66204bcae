//! Shared daemon state
//!
//! - `ActivityStatus` / `StatusTracker`: debounced microphone status
//! - `ConnectionState`: lifecycle of the peripheral session
//! - `CoreState`: everything the periodic tasks share, behind one lock

mod shared;
mod tracker;

pub use shared::{ConnectionState, CoreState, MonitorSession};
pub use tracker::{ActivityStatus, StatusTracker};
