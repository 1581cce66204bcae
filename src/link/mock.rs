//! Scripted link for exercising the orchestrator without hardware

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::color::Rgb;

use super::{ConnectError, DeviceAddress, DiscoveryError, PeripheralLink, SendError, Transport};

pub struct MockLink {
    transport: Transport,
    discovered: Mutex<Option<DeviceAddress>>,
    fail_connect: AtomicBool,
    connected: AtomicBool,
    /// Answers for upcoming liveness probes, falling back to `connected`
    probes: Mutex<VecDeque<bool>>,
    sent: Mutex<Vec<Rgb>>,
    connect_delay: Duration,
    send_delay: Duration,
    /// Order of completed transport operations
    ops: Mutex<Vec<&'static str>>,
    pub probe_count: AtomicUsize,
    pub disconnect_count: AtomicUsize,
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            transport: Transport::Ble,
            discovered: Mutex::new(Some(Self::device())),
            fail_connect: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            probes: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            connect_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
            ops: Mutex::new(Vec::new()),
            probe_count: AtomicUsize::new(0),
            disconnect_count: AtomicUsize::new(0),
        }
    }

    pub fn device() -> DeviceAddress {
        DeviceAddress {
            transport: Transport::Ble,
            id: "AA:BB:CC:DD:EE:FF".to_string(),
            name: "busy_light_01".to_string(),
        }
    }

    pub fn serial(mut self) -> Self {
        self.transport = Transport::Serial;
        self
    }

    pub fn without_device(self) -> Self {
        *self.discovered.lock() = None;
        self
    }

    pub fn failing_connect(self) -> Self {
        self.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Connects bring the link up at once but take `delay` to finish
    pub fn slow_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn slow_send(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn script_probes(&self, answers: &[bool]) {
        self.probes.lock().extend(answers.iter().copied());
    }

    pub fn sent(&self) -> Vec<Rgb> {
        self.sent.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.ops.lock().clone()
    }
}

#[async_trait]
impl PeripheralLink for MockLink {
    fn transport(&self) -> Transport {
        self.transport
    }

    async fn discover(
        &self,
        filter: &str,
        _timeout: Duration,
    ) -> Result<DeviceAddress, DiscoveryError> {
        self.discovered.lock().clone().ok_or(DiscoveryError::NotFound {
            filter: filter.to_string(),
        })
    }

    async fn connect(&self, _target: &DeviceAddress) -> Result<(), ConnectError> {
        // Half-open until the delay passes, like a GATT link awaiting services
        self.connected.store(true, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        if self.fail_connect.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(ConnectError::Backend("refused".to_string()));
        }
        self.ops.lock().push("connect");
        Ok(())
    }

    async fn send(&self, color: Rgb) -> Result<(), SendError> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SendError::NotConnected);
        }
        self.sent.lock().push(color);
        self.ops.lock().push("send");
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.ops.lock().push("disconnect");
    }

    async fn is_connected(&self) -> bool {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.probes.lock().pop_front();
        scripted.unwrap_or_else(|| self.connected.load(Ordering::SeqCst))
    }
}
