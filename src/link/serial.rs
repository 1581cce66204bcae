//! USB-serial microcontroller link
//!
//! The firmware takes one ASCII letter per color and echoes a line back.
//! All port I/O is blocking, so it runs on the blocking pool behind a mutex
//! that serializes sends, probes and teardown.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use tracing::{debug, info, warn};

use crate::color::Rgb;

use super::discovery::{unique_port_match, PortCandidate};
use super::error::{ConnectError, DiscoveryError, SendError};
use super::{DeviceAddress, PeripheralLink, Transport};

pub const BAUD_RATE: u32 = 115_200;

/// Read timeout, which also bounds the wait for an ACK line
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

const MAX_ACK_LEN: usize = 256;

type PortSlot = Option<Box<dyn SerialPort>>;

pub struct SerialLink {
    port: Arc<Mutex<PortSlot>>,
}

impl SerialLink {
    pub fn new() -> Self {
        Self {
            port: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `f` against the port slot on the blocking pool
    async fn with_port<T, F>(&self, f: F) -> Result<T, tokio::task::JoinError>
    where
        F: FnOnce(&mut PortSlot) -> T + Send + 'static,
        T: Send + 'static,
    {
        let port = Arc::clone(&self.port);
        tokio::task::spawn_blocking(move || f(&mut *port.lock())).await
    }
}

impl Default for SerialLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeripheralLink for SerialLink {
    fn transport(&self) -> Transport {
        Transport::Serial
    }

    async fn discover(
        &self,
        marker: &str,
        timeout: Duration,
    ) -> Result<DeviceAddress, DiscoveryError> {
        let enumerate = tokio::task::spawn_blocking(serialport::available_ports);
        let ports = tokio::time::timeout(timeout, enumerate)
            .await
            .map_err(|_| DiscoveryError::Backend("port enumeration timed out".to_string()))?
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?;

        let candidates: Vec<PortCandidate> = ports.iter().map(candidate).collect();
        debug!(count = candidates.len(), "enumerated serial ports");

        let found = unique_port_match(&candidates, marker)?;
        info!(port = %found.name, description = %found.description, "serial peripheral found");

        Ok(DeviceAddress {
            transport: Transport::Serial,
            id: found.name,
            name: found.description,
        })
    }

    async fn connect(&self, target: &DeviceAddress) -> Result<(), ConnectError> {
        if target.transport != Transport::Serial {
            return Err(ConnectError::UnknownTarget(target.id.clone()));
        }

        let path = target.id.clone();
        self.with_port(move |slot| -> Result<(), ConnectError> {
            // Drop any previous handle before opening, one port at a time
            slot.take();
            let port = serialport::new(&path, BAUD_RATE)
                .timeout(READ_TIMEOUT)
                .open()
                .map_err(|e| ConnectError::Backend(format!("{}: {}", path, e)))?;
            *slot = Some(port);
            Ok(())
        })
        .await
        .map_err(|e| ConnectError::Backend(e.to_string()))??;

        info!(port = %target.id, baud = BAUD_RATE, "serial port opened");
        Ok(())
    }

    async fn send(&self, color: Rgb) -> Result<(), SendError> {
        let code = color.serial_code();

        self.with_port(move |slot| -> Result<(), SendError> {
            let port = slot.as_mut().ok_or(SendError::NotConnected)?;
            port.write_all(&[code])?;
            port.flush()?;
            debug!(code = %char::from(code), "color code written");

            match read_ack(port, READ_TIMEOUT) {
                Ok(Some(line)) => debug!(ack = %line, "peripheral acknowledged"),
                Ok(None) => debug!("no acknowledgment from peripheral"),
                Err(e) => debug!(error = %e, "failed to read acknowledgment"),
            }
            Ok(())
        })
        .await
        .map_err(|e| SendError::Backend(e.to_string()))?
    }

    async fn disconnect(&self) {
        match self.with_port(|slot| slot.take().is_some()).await {
            Ok(true) => info!("serial port closed"),
            Ok(false) => debug!("serial disconnect with no open port"),
            Err(e) => warn!(error = %e, "serial disconnect task failed"),
        }
    }

    async fn is_connected(&self) -> bool {
        self.with_port(|slot| {
            slot.as_ref()
                .map(|port| port.bytes_to_read().is_ok())
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false)
    }
}

fn candidate(info: &SerialPortInfo) -> PortCandidate {
    PortCandidate {
        name: info.port_name.clone(),
        description: describe(&info.port_type),
    }
}

/// Description matched against the vendor marker
fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let mut parts = vec!["USB".to_string()];
            parts.extend(usb.manufacturer.iter().cloned());
            parts.extend(usb.product.iter().cloned());
            parts.join(" ")
        }
        SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
        SerialPortType::PciPort => "PCI serial port".to_string(),
        SerialPortType::Unknown => "Serial port".to_string(),
    }
}

/// Read one newline-terminated line, giving up at `timeout`
///
/// `Ok(None)` means nothing arrived.
fn read_ack<R: Read + ?Sized>(reader: &mut R, timeout: Duration) -> io::Result<Option<String>> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    while line.len() < MAX_ACK_LEN && Instant::now() < deadline {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let text = String::from_utf8_lossy(&line).trim().to_string();
    Ok((!text.is_empty()).then_some(text))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    struct TimesOut;

    impl Read for TimesOut {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
        }
    }

    #[test]
    fn test_read_ack_line() {
        let mut input = Cursor::new(b"Color set: R\r\nleftover".to_vec());
        let ack = read_ack(&mut input, READ_TIMEOUT).unwrap();
        assert_eq!(ack.as_deref(), Some("Color set: R"));
    }

    #[test]
    fn test_read_ack_empty() {
        let mut input = Cursor::new(Vec::new());
        assert_eq!(read_ack(&mut input, READ_TIMEOUT).unwrap(), None);
    }

    #[test]
    fn test_read_ack_timeout_is_not_an_error() {
        assert_eq!(read_ack(&mut TimesOut, READ_TIMEOUT).unwrap(), None);
    }

    #[test]
    fn test_describe_non_usb() {
        assert_eq!(describe(&SerialPortType::PciPort), "PCI serial port");
        assert!(!describe(&SerialPortType::Unknown).contains("USB"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let link = SerialLink::new();
        link.disconnect().await;
        link.disconnect().await;
        assert!(!link.is_connected().await);
    }

    #[tokio::test]
    async fn test_send_without_port() {
        let link = SerialLink::new();
        let err = link.send(Rgb::RED).await.unwrap_err();
        assert!(matches!(err, SendError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_rejects_ble_target() {
        let link = SerialLink::new();
        let target = DeviceAddress {
            transport: Transport::Ble,
            id: "AA:BB:CC:DD:EE:FF".to_string(),
            name: "busy_light_01".to_string(),
        };
        let err = link.connect(&target).await.unwrap_err();
        assert!(matches!(err, ConnectError::UnknownTarget(_)));
    }
}
