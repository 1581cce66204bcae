//! Events broadcast to the UI collaborator
//!
//! Emitted by the orchestrator and forwarded to subscribed IPC clients.

use serde::{Deserialize, Serialize};

use crate::state::{ActivityStatus, ConnectionState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// Microphone status changed (or was sampled for the first time)
    StatusChanged { status: ActivityStatus },

    /// Peripheral session changed state
    ConnectionChanged {
        state: ConnectionState,
        reason: String,
    },

    /// Activity polling started or stopped
    MonitoringChanged { running: bool },
}

impl std::fmt::Display for CoreEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreEvent::StatusChanged { status } => write!(f, "STATUS_CHANGED ({})", status),
            CoreEvent::ConnectionChanged { state, reason } => {
                write!(f, "CONNECTION_CHANGED ({}: {})", state, reason)
            }
            CoreEvent::MonitoringChanged { running } => {
                write!(f, "MONITORING_CHANGED (running={})", running)
            }
        }
    }
}
