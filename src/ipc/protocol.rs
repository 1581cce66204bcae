//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::color::{ColorSlot, Rgb};
use crate::events::CoreEvent;
use crate::link::{DeviceAddress, LinkError, Transport};
use crate::orchestrator::StatusSnapshot;
use crate::state::{ActivityStatus, ConnectionState};

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to status and connection notifications
    Subscribe,

    StartMonitoring,
    StopMonitoring,

    /// Discover and connect the peripheral
    Connect,
    Disconnect,

    /// Change one of the configured colors
    SetColor { slot: ColorSlot, color: Rgb },

    /// Change the discovery filter of the configured transport
    SetFilter { filter: String },

    /// Pin a serial port, `null` to go back to discovery
    SetSerialPort { port: Option<String> },
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    /// Request carried out
    Ack,

    /// Peripheral connected
    Connected { device: DeviceAddress },

    /// Pushed to subscribed clients
    Event { event: CoreEvent },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<LinkError> for Response {
    fn from(err: LinkError) -> Self {
        Response::error(err.code(), err.to_string())
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Last sampled microphone status, `None` before the first sample
    pub activity: Option<ActivityStatus>,

    /// Whether activity polling is running
    pub monitoring: bool,

    pub connection: ConnectionState,

    /// Connected device, if any
    pub device: Option<DeviceAddress>,

    pub transport: Transport,
    pub active_color: Rgb,
    pub idle_color: Rgb,
    pub discovery_filter: String,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn from_snapshot(snapshot: StatusSnapshot, uptime_secs: u64) -> Self {
        let discovery_filter = snapshot.settings.filter().to_string();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            activity: snapshot.activity,
            monitoring: snapshot.monitoring,
            connection: snapshot.connection,
            device: snapshot.device,
            transport: snapshot.settings.transport,
            active_color: snapshot.settings.active_color,
            idle_color: snapshot.settings.idle_color,
            discovery_filter,
            uptime_secs,
        }
    }
}
