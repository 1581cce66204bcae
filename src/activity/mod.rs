//! Microphone activity sampling
//!
//! The sampler is polled from the orchestrator's poll task on the blocking
//! pool, so implementations are free to do synchronous OS reads.

mod consent;
#[cfg(windows)]
mod registry;

use std::sync::Arc;

use crate::state::ActivityStatus;

pub use consent::{ConsentStoreSampler, NoUsageRecords};
#[cfg(windows)]
pub use registry::WindowsRegistry;

/// Source of the current microphone status
pub trait ActivitySampler: Send + Sync {
    fn sample(&self) -> ActivityStatus;
}

/// Reading a usage record failed
#[derive(Debug, thiserror::Error)]
pub enum ActivityReadError {
    #[error("permission denied reading {0}")]
    PermissionDenied(String),

    #[error("failed to read {location}: OS error {code}")]
    Os { location: String, code: u32 },
}

/// Sampler for the current host
#[cfg(windows)]
pub fn host_sampler() -> Arc<dyn ActivitySampler> {
    Arc::new(ConsentStoreSampler::new(WindowsRegistry))
}

/// Sampler for the current host
#[cfg(not(windows))]
pub fn host_sampler() -> Arc<dyn ActivitySampler> {
    tracing::warn!("no microphone consent store on this platform, activity will always read idle");
    Arc::new(ConsentStoreSampler::new(NoUsageRecords))
}
