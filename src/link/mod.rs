//! Peripheral links
//!
//! One async trait over the two supported transports:
//! - BLE: GATT write of `"<R>,<G>,<B>"` to a fixed characteristic
//! - Serial: single-byte color code at 115200 baud, optional ACK line

#[cfg(feature = "ble")]
mod ble;
mod discovery;
mod error;
mod gate;
#[cfg(test)]
pub mod mock;
mod serial;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::color::Rgb;

#[cfg(feature = "ble")]
pub use ble::BleLink;
pub use error::{ConnectError, DiscoveryError, LinkError, SendError};
pub use gate::SendGate;
pub use serial::SerialLink;

/// Supported peripheral transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Ble,
    Serial,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Ble => write!(f, "BLE"),
            Transport::Serial => write!(f, "serial"),
        }
    }
}

/// A discovered peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub transport: Transport,
    /// BLE address or serial port path
    pub id: String,
    /// Advertised name or port description
    pub name: String,
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Connection to the indicator device
///
/// Implementations own the single live session and serialize every
/// operation on it, so a teardown can never interleave with a send.
#[async_trait]
pub trait PeripheralLink: Send + Sync {
    fn transport(&self) -> Transport;

    /// Look for a device matching `filter`, giving up after `timeout`
    async fn discover(
        &self,
        filter: &str,
        timeout: Duration,
    ) -> Result<DeviceAddress, DiscoveryError>;

    /// Open a session; on error no session is left behind
    async fn connect(&self, target: &DeviceAddress) -> Result<(), ConnectError>;

    async fn send(&self, color: Rgb) -> Result<(), SendError>;

    /// Tear down the session. Calling it without a session is a no-op.
    async fn disconnect(&self);

    /// Cheap liveness probe; a failing probe reads as disconnected
    async fn is_connected(&self) -> bool;
}

/// Build the link selected in settings
pub fn open(transport: Transport) -> anyhow::Result<Arc<dyn PeripheralLink>> {
    match transport {
        #[cfg(feature = "ble")]
        Transport::Ble => Ok(Arc::new(BleLink::new())),
        #[cfg(not(feature = "ble"))]
        Transport::Ble => anyhow::bail!("built without BLE support, enable the `ble` feature"),
        Transport::Serial => Ok(Arc::new(SerialLink::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_serialization() {
        assert_eq!(serde_json::to_string(&Transport::Ble).unwrap(), "\"ble\"");
        let t: Transport = serde_json::from_str("\"serial\"").unwrap();
        assert_eq!(t, Transport::Serial);
    }

    #[test]
    fn test_open_serial() {
        let link = open(Transport::Serial).unwrap();
        assert_eq!(link.transport(), Transport::Serial);
    }

    #[test]
    fn test_device_display() {
        let device = DeviceAddress {
            transport: Transport::Serial,
            id: "COM3".to_string(),
            name: "USB Serial Device".to_string(),
        };
        assert_eq!(device.to_string(), "USB Serial Device (COM3)");
    }
}
