//! Activity status debouncing
//!
//! Turns the stream of raw samples into change notifications. The first
//! sample always counts as a change so the indicator gets an initial color.

use serde::{Deserialize, Serialize};

/// Whether the microphone is currently in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Some application holds an open microphone session
    Active,
    /// No open microphone session
    Idle,
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityStatus::Active => write!(f, "Active"),
            ActivityStatus::Idle => write!(f, "Idle"),
        }
    }
}

/// A status transition reported by [`StatusTracker::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// `None` on the very first sample
    pub previous: Option<ActivityStatus>,
    pub current: ActivityStatus,
}

/// Remembers the last sample and reports transitions
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: Option<ActivityStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last sample seen, `None` until the first update
    pub fn last(&self) -> Option<ActivityStatus> {
        self.last
    }

    /// Record a sample, returning a change when it differs from the previous
    /// one or is the first ever seen
    pub fn update(&mut self, sample: ActivityStatus) -> Option<StatusChange> {
        let previous = self.last.replace(sample);

        if previous == Some(sample) {
            None
        } else {
            Some(StatusChange {
                previous,
                current: sample,
            })
        }
    }
}
