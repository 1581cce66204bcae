//! Errors raised by peripheral links

use std::time::Duration;

/// Finding a peripheral failed
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no device matching {filter:?} was found")]
    NotFound { filter: String },

    #[error("{} devices match {filter:?}, select one manually", candidates.len())]
    Ambiguous {
        filter: String,
        candidates: Vec<String>,
    },

    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("discovery failed: {0}")]
    Backend(String),
}

/// Establishing a session failed
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("a connection attempt is already in progress")]
    InProgress,

    #[error("connection attempt was cancelled")]
    Cancelled,

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("device {0} was not seen during discovery")]
    UnknownTarget(String),

    #[error("device does not expose characteristic {0}")]
    CharacteristicMissing(String),

    #[error("connection failed: {0}")]
    Backend(String),
}

/// Transmitting a color failed
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("peripheral is not connected")]
    NotConnected,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("send failed: {0}")]
    Backend(String),
}

/// Errors surfaced by `connect_peripheral`
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl LinkError {
    /// Stable code reported to IPC clients
    pub fn code(&self) -> &'static str {
        match self {
            LinkError::Discovery(DiscoveryError::NotFound { .. }) => "not_found",
            LinkError::Discovery(DiscoveryError::Ambiguous { .. }) => "ambiguous",
            LinkError::Discovery(DiscoveryError::NoAdapter) => "no_adapter",
            LinkError::Discovery(DiscoveryError::Backend(_)) => "discovery_failed",
            LinkError::Connect(_) => "connect_failed",
        }
    }
}
