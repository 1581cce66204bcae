//! State shared by the sampler, session monitor, and IPC tasks

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::color::Rgb;
use crate::config::Settings;
use crate::link::{DeviceAddress, SendGate};

use super::tracker::{ActivityStatus, StatusTracker};

/// Lifecycle of the peripheral session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Only reported in events; a failed attempt is stored as `Disconnected`
    Failed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Whether the activity poll task exists
#[derive(Debug, Default)]
pub enum MonitorSession {
    #[default]
    Stopped,
    Running {
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
}

impl MonitorSession {
    pub fn is_running(&self) -> bool {
        matches!(self, MonitorSession::Running { .. })
    }
}

/// Everything the periodic tasks read and write
///
/// Lives behind a single mutex in the orchestrator. The lock is never held
/// across a transport call.
#[derive(Debug)]
pub struct CoreState {
    pub settings: Settings,
    pub tracker: StatusTracker,
    pub connection: ConnectionState,
    /// Device of the current session, set while `Connected`
    pub target: Option<DeviceAddress>,
    pub gate: SendGate,
    /// Bumped for every established session so stale monitors can tell
    pub generation: u64,
    pub monitor: MonitorSession,
}

impl CoreState {
    pub fn new(settings: Settings) -> Self {
        let gate = SendGate::new(settings.keep_alive());
        Self {
            settings,
            tracker: StatusTracker::new(),
            connection: ConnectionState::Disconnected,
            target: None,
            gate,
            generation: 0,
            monitor: MonitorSession::Stopped,
        }
    }

    /// Color configured for a status
    pub fn color_for(&self, status: ActivityStatus) -> Rgb {
        match status {
            ActivityStatus::Active => self.settings.active_color,
            ActivityStatus::Idle => self.settings.idle_color,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// True while `generation` names the live, connected session
    pub fn is_current_session(&self, generation: u64) -> bool {
        self.is_connected() && self.generation == generation
    }
}
