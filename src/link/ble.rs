//! Bluetooth Low Energy light link
//!
//! Scans for a peripheral advertising a name that contains the discovery
//! filter, connects once, and writes `"<R>,<G>,<B>"` to the color
//! characteristic.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::color::Rgb;

use super::discovery::first_name_match;
use super::error::{ConnectError, DiscoveryError, SendError};
use super::{DeviceAddress, PeripheralLink, Transport};

/// Characteristic the light firmware listens on
pub const COLOR_CHARACTERISTIC: Uuid = Uuid::from_u128(0xabcd1234_abcd_1234_abcd_12345678abcd);

/// How often the scan results are checked for a match
const SCAN_POLL: Duration = Duration::from_millis(250);

struct Session {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

pub struct BleLink {
    /// Peripherals seen by the last discovery, keyed by address
    seen: Mutex<HashMap<String, Peripheral>>,
    session: Mutex<Option<Session>>,
    /// Peripheral with a connect in flight, so a dropped attempt can still
    /// be torn down by `disconnect`
    pending: Mutex<Option<Peripheral>>,
}

impl BleLink {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    async fn adapter() -> Result<Adapter, DiscoveryError> {
        let manager = Manager::new()
            .await
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?;
        adapters.into_iter().next().ok_or(DiscoveryError::NoAdapter)
    }

    /// Scan until a name matches or the window closes
    async fn scan(
        adapter: &Adapter,
        filter: &str,
        timeout: Duration,
    ) -> Result<Option<(Peripheral, String)>, DiscoveryError> {
        let deadline = Instant::now() + timeout;

        loop {
            let peripherals = adapter
                .peripherals()
                .await
                .map_err(|e| DiscoveryError::Backend(e.to_string()))?;

            let mut named = Vec::with_capacity(peripherals.len());
            for peripheral in peripherals {
                let name = match peripheral.properties().await {
                    Ok(props) => props.and_then(|p| p.local_name),
                    Err(e) => {
                        debug!(error = %e, "failed to read peripheral properties");
                        None
                    }
                };
                named.push(((peripheral, name.clone().unwrap_or_default()), name));
            }

            if let Some(found) = first_name_match(named, filter) {
                return Ok(Some(found));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(SCAN_POLL).await;
        }
    }

    async fn open_session(peripheral: &Peripheral) -> Result<Characteristic, ConnectError> {
        peripheral
            .connect()
            .await
            .map_err(|e| ConnectError::Backend(e.to_string()))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| ConnectError::Backend(e.to_string()))?;

        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == COLOR_CHARACTERISTIC)
            .ok_or_else(|| ConnectError::CharacteristicMissing(COLOR_CHARACTERISTIC.to_string()))
    }
}

impl Default for BleLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeripheralLink for BleLink {
    fn transport(&self) -> Transport {
        Transport::Ble
    }

    async fn discover(
        &self,
        filter: &str,
        timeout: Duration,
    ) -> Result<DeviceAddress, DiscoveryError> {
        let adapter = Self::adapter().await?;

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?;
        debug!(filter, ?timeout, "BLE scan started");

        let result = Self::scan(&adapter, filter, timeout).await;

        if let Err(e) = adapter.stop_scan().await {
            warn!(error = %e, "failed to stop BLE scan");
        }

        let Some((peripheral, name)) = result? else {
            return Err(DiscoveryError::NotFound {
                filter: filter.to_string(),
            });
        };

        let id = peripheral.address().to_string();
        info!(address = %id, name = %name, "BLE peripheral found");
        self.seen.lock().await.insert(id.clone(), peripheral);

        Ok(DeviceAddress {
            transport: Transport::Ble,
            id,
            name,
        })
    }

    async fn connect(&self, target: &DeviceAddress) -> Result<(), ConnectError> {
        let peripheral = match target.transport {
            Transport::Ble => self.seen.lock().await.get(&target.id).cloned(),
            Transport::Serial => None,
        }
        .ok_or_else(|| ConnectError::UnknownTarget(target.id.clone()))?;

        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            let _ = old.peripheral.disconnect().await;
        }

        *self.pending.lock().await = Some(peripheral.clone());
        let opened = Self::open_session(&peripheral).await;
        self.pending.lock().await.take();

        match opened {
            Ok(characteristic) => {
                info!(address = %target.id, "BLE session established");
                *session = Some(Session {
                    peripheral,
                    characteristic,
                });
                Ok(())
            }
            Err(e) => {
                // A half-open GATT connection must not outlive the failure
                let _ = peripheral.disconnect().await;
                Err(e)
            }
        }
    }

    async fn send(&self, color: Rgb) -> Result<(), SendError> {
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or(SendError::NotConnected)?;

        let payload = color.to_string();
        session
            .peripheral
            .write(&session.characteristic, payload.as_bytes(), WriteType::WithResponse)
            .await
            .map_err(|e| SendError::Backend(e.to_string()))?;

        debug!(payload = %payload, "color written");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(peripheral) = self.pending.lock().await.take() {
            match peripheral.disconnect().await {
                Ok(()) => info!("abandoned BLE connect torn down"),
                Err(e) => warn!(error = %e, "failed to tear down abandoned BLE connect"),
            }
        }

        let Some(session) = self.session.lock().await.take() else {
            debug!("BLE disconnect with no session");
            return;
        };

        match session.peripheral.disconnect().await {
            Ok(()) => info!("BLE session closed"),
            Err(e) => warn!(error = %e, "BLE disconnect failed"),
        }
    }

    async fn is_connected(&self) -> bool {
        let session = self.session.lock().await;
        match session.as_ref() {
            Some(session) => match session.peripheral.is_connected().await {
                Ok(connected) => connected,
                Err(e) => {
                    debug!(error = %e, "BLE liveness probe failed");
                    false
                }
            },
            None => false,
        }
    }
}
