//! Orchestrator: wires sampler, tracker, gate and link together
//!
//! All shared fields live in one `CoreState` behind a single mutex. The lock
//! is only taken for short synchronous sections and is never held across a
//! transport call, so disconnects are safe from any task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::activity::ActivitySampler;
use crate::color::{ColorSlot, Rgb};
use crate::config::{Settings, SettingsStore};
use crate::events::CoreEvent;
use crate::link::{
    ConnectError, DeviceAddress, DiscoveryError, LinkError, PeripheralLink, SendError, Transport,
};
use crate::state::{ActivityStatus, ConnectionState, CoreState, MonitorSession, StatusTracker};

use super::{monitor, poller};

const EVENT_CAPACITY: usize = 64;

/// Extra time granted to a link's own scan window before giving up on it
const DISCOVERY_GRACE: Duration = Duration::from_secs(5);

/// Point-in-time view for status queries
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub activity: Option<ActivityStatus>,
    pub monitoring: bool,
    pub connection: ConnectionState,
    pub device: Option<DeviceAddress>,
    pub settings: Settings,
}

pub struct Orchestrator {
    state: parking_lot::Mutex<CoreState>,
    link: Arc<dyn PeripheralLink>,
    sampler: Arc<dyn ActivitySampler>,
    store: Option<SettingsStore>,
    events: broadcast::Sender<CoreEvent>,
    /// Held across gate check, transmit and record so pushes never double-send
    send_lock: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        link: Arc<dyn PeripheralLink>,
        sampler: Arc<dyn ActivitySampler>,
        store: Option<SettingsStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            state: parking_lot::Mutex::new(CoreState::new(settings)),
            link,
            sampler,
            store,
            events,
            send_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.state.lock();
        StatusSnapshot {
            activity: state.tracker.last(),
            monitoring: state.monitor.is_running(),
            connection: state.connection,
            device: state.target.clone(),
            settings: state.settings.clone(),
        }
    }

    pub(super) fn link(&self) -> &Arc<dyn PeripheralLink> {
        &self.link
    }

    pub(super) fn sampler(&self) -> Arc<dyn ActivitySampler> {
        Arc::clone(&self.sampler)
    }

    pub(super) fn is_current_session(&self, generation: u64) -> bool {
        self.state.lock().is_current_session(generation)
    }

    fn emit(&self, event: CoreEvent) {
        debug!(%event, "emitting event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Start the activity poll task; no-op when already running
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock();
        if state.monitor.is_running() {
            debug!("monitoring already running");
            return false;
        }

        let period = state.settings.poll_interval();
        // The first sample of every run reports its status
        state.tracker = StatusTracker::new();
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(poller::run(Arc::clone(self), period, stop_rx));
        state.monitor = MonitorSession::Running { stop, task };
        drop(state);

        info!(?period, "monitoring started");
        self.emit(CoreEvent::MonitoringChanged { running: true });
        true
    }

    /// Stop the activity poll task and wait for it to exit; no-op when stopped
    pub async fn stop_monitoring(&self) -> bool {
        let previous = std::mem::take(&mut self.state.lock().monitor);

        let MonitorSession::Running { stop, task } = previous else {
            debug!("monitoring already stopped");
            return false;
        };

        let _ = stop.send(());
        if let Err(e) = task.await {
            warn!(error = %e, "activity poll task ended abnormally");
        }
        self.state.lock().tracker = StatusTracker::new();

        info!("monitoring stopped");
        self.emit(CoreEvent::MonitoringChanged { running: false });
        true
    }

    /// Feed one sample through the tracker and push the matching color
    pub(super) async fn observe(&self, sample: ActivityStatus) {
        let (change, color) = {
            let mut state = self.state.lock();
            (state.tracker.update(sample), state.color_for(sample))
        };

        if let Some(change) = change {
            info!(from = ?change.previous, to = %change.current, "microphone status changed");
            self.emit(CoreEvent::StatusChanged {
                status: change.current,
            });
        }

        // Unchanged samples still go through the gate for keep-alive resends
        self.push_color(color).await;
    }

    /// Send `color` if the gate allows it. Returns whether a write happened.
    pub(super) async fn push_color(&self, color: Rgb) -> bool {
        let _send = self.send_lock.lock().await;

        let send_timeout = {
            let state = self.state.lock();
            if !state.gate.should_send(color, Instant::now(), state.is_connected()) {
                trace!(%color, "send suppressed");
                return false;
            }
            state.settings.send_timeout()
        };

        let sent = timeout(send_timeout, self.link.send(color))
            .await
            .unwrap_or(Err(SendError::Timeout(send_timeout)));

        match sent {
            Ok(()) => {
                self.state.lock().gate.record_sent(color, Instant::now());
                debug!(%color, "color sent");
                true
            }
            Err(e) => {
                warn!(%color, error = %e, "failed to send color");
                false
            }
        }
    }

    /// Discover and connect the peripheral
    ///
    /// Already connected returns the current device. On failure the state is
    /// left `Disconnected` and a `Failed` event is broadcast.
    pub async fn connect_peripheral(self: &Arc<Self>) -> Result<DeviceAddress, LinkError> {
        let (filter, manual, scan_timeout, connect_timeout) = {
            let mut state = self.state.lock();

            if let (ConnectionState::Connected, Some(target)) = (state.connection, &state.target) {
                debug!(device = %target, "already connected");
                return Ok(target.clone());
            }
            if state.connection == ConnectionState::Connecting {
                return Err(ConnectError::InProgress.into());
            }

            state.connection = ConnectionState::Connecting;
            let settings = &state.settings;
            let manual = match self.link.transport() {
                Transport::Serial => settings.serial_port.clone().map(|port| DeviceAddress {
                    transport: Transport::Serial,
                    id: port,
                    name: "manually selected port".to_string(),
                }),
                Transport::Ble => None,
            };
            (
                settings.filter().to_string(),
                manual,
                settings.scan_timeout(),
                settings.connect_timeout(),
            )
        };

        self.emit(CoreEvent::ConnectionChanged {
            state: ConnectionState::Connecting,
            reason: format!("looking for {:?}", filter),
        });

        let target = match manual {
            Some(target) => target,
            None => {
                let limit = scan_timeout + DISCOVERY_GRACE;
                let discovered = timeout(limit, self.link.discover(&filter, scan_timeout))
                    .await
                    .unwrap_or_else(|_| {
                        Err(DiscoveryError::Backend("discovery timed out".to_string()))
                    });

                match discovered {
                    Ok(target) => target,
                    Err(e) => {
                        self.connect_failed(&e.to_string());
                        return Err(e.into());
                    }
                }
            }
        };

        let connected = timeout(connect_timeout, self.link.connect(&target))
            .await
            .unwrap_or(Err(ConnectError::Timeout(connect_timeout)));

        if let Err(e) = connected {
            self.force_disconnect(connect_timeout).await;
            self.connect_failed(&e.to_string());
            return Err(e.into());
        }

        let established = {
            let mut state = self.state.lock();
            if state.connection == ConnectionState::Connecting {
                state.connection = ConnectionState::Connected;
                state.target = Some(target.clone());
                state.generation += 1;
                state.gate.reset();
                let pending = state.tracker.last().map(|status| state.color_for(status));
                Some((state.generation, state.settings.session_check_interval(), pending))
            } else {
                None
            }
        };

        let Some((generation, check_interval, pending)) = established else {
            info!(device = %target, "connection cancelled while connecting");
            self.force_disconnect(connect_timeout).await;
            return Err(ConnectError::Cancelled.into());
        };

        info!(device = %target, generation, "peripheral connected");
        self.emit(CoreEvent::ConnectionChanged {
            state: ConnectionState::Connected,
            reason: format!("connected to {}", target),
        });

        tokio::spawn(monitor::watch(Arc::clone(self), generation, check_interval));

        if let Some(color) = pending {
            self.push_color(color).await;
        }

        Ok(target)
    }

    fn connect_failed(&self, reason: &str) {
        let was_connecting = {
            let mut state = self.state.lock();
            let connecting = state.connection == ConnectionState::Connecting;
            if connecting {
                state.connection = ConnectionState::Disconnected;
            }
            connecting
        };

        warn!(reason, "connection attempt failed");

        // A user disconnect already reported the attempt as over
        if was_connecting {
            self.emit(CoreEvent::ConnectionChanged {
                state: ConnectionState::Failed,
                reason: reason.to_string(),
            });
        }
    }

    /// Transport teardown, bounded so a wedged link cannot stall the caller
    async fn force_disconnect(&self, limit: Duration) {
        if timeout(limit, self.link.disconnect()).await.is_err() {
            warn!(timeout = ?limit, "transport disconnect timed out");
        }
    }

    /// User-initiated disconnect. Returns whether a session was open.
    pub async fn disconnect_peripheral(&self) -> bool {
        let (previous, limit) = {
            let mut state = self.state.lock();
            let previous = std::mem::take(&mut state.connection);
            state.target = None;
            (previous, state.settings.connect_timeout())
        };

        // Let an in-flight send finish before the transport goes away
        let _send = self.send_lock.lock().await;
        self.force_disconnect(limit).await;

        if previous == ConnectionState::Disconnected {
            debug!("already disconnected");
            return false;
        }

        info!("peripheral disconnected");
        self.emit(CoreEvent::ConnectionChanged {
            state: ConnectionState::Disconnected,
            reason: "disconnected by user".to_string(),
        });
        true
    }

    /// Reconcile a dead session found by the session monitor
    ///
    /// Only acts while `generation` is still the connected session, so the
    /// event fires once per session.
    pub(super) async fn handle_session_lost(&self, generation: u64, reason: &str) -> bool {
        let limit = {
            let mut state = self.state.lock();
            if !state.is_current_session(generation) {
                return false;
            }
            state.connection = ConnectionState::Disconnected;
            state.target = None;
            state.settings.connect_timeout()
        };

        warn!(generation, reason, "peripheral session lost");
        let _send = self.send_lock.lock().await;
        self.force_disconnect(limit).await;
        self.emit(CoreEvent::ConnectionChanged {
            state: ConnectionState::Disconnected,
            reason: reason.to_string(),
        });
        true
    }

    /// Change a configured color and repaint if it is the one on display
    pub async fn set_color(&self, slot: ColorSlot, color: Rgb) -> anyhow::Result<()> {
        let (settings, repaint) = {
            let mut state = self.state.lock();
            match slot {
                ColorSlot::Active => state.settings.active_color = color,
                ColorSlot::Idle => state.settings.idle_color = color,
            }
            let repaint = state
                .tracker
                .last()
                .filter(|status| slot_for(*status) == slot)
                .map(|_| color);
            (state.settings.clone(), repaint)
        };

        info!(?slot, %color, "color changed");
        let saved = self.persist(&settings);

        if let Some(color) = repaint {
            self.push_color(color).await;
        }

        saved
    }

    /// Change the discovery filter of the configured transport
    pub fn set_filter(&self, filter: String) -> anyhow::Result<()> {
        let settings = {
            let mut state = self.state.lock();
            match state.settings.transport {
                Transport::Ble => state.settings.discovery_filter = filter,
                Transport::Serial => state.settings.serial_marker = filter,
            }
            state.settings.clone()
        };

        info!(filter = %settings.filter(), "discovery filter changed");
        self.persist(&settings)
    }

    /// Pin a serial port, or clear the pin to go back to discovery
    pub fn set_serial_port(&self, port: Option<String>) -> anyhow::Result<()> {
        let settings = {
            let mut state = self.state.lock();
            state.settings.serial_port = port;
            state.settings.clone()
        };

        info!(port = ?settings.serial_port, "serial port selection changed");
        self.persist(&settings)
    }

    fn persist(&self, settings: &Settings) -> anyhow::Result<()> {
        match &self.store {
            Some(store) => store.save(settings),
            None => Ok(()),
        }
    }

    /// Stop polling and release the peripheral
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;
        self.disconnect_peripheral().await;
    }
}

fn slot_for(status: ActivityStatus) -> ColorSlot {
    match status {
        ActivityStatus::Active => ColorSlot::Active,
        ActivityStatus::Idle => ColorSlot::Idle,
    }
}

#[cfg(test)]
pub(super) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex;

    use super::*;
    use crate::link::mock::MockLink;
    use ActivityStatus::{Active, Idle};

    /// Returns queued samples, then `Idle`
    pub struct ScriptedSampler {
        samples: Mutex<VecDeque<ActivityStatus>>,
    }

    impl ScriptedSampler {
        pub fn new(samples: &[ActivityStatus]) -> Self {
            Self {
                samples: Mutex::new(samples.iter().copied().collect()),
            }
        }
    }

    impl ActivitySampler for ScriptedSampler {
        fn sample(&self) -> ActivityStatus {
            self.samples.lock().pop_front().unwrap_or(Idle)
        }
    }

    pub fn orchestrator(link: &Arc<MockLink>, settings: Settings) -> Arc<Orchestrator> {
        Orchestrator::new(
            settings,
            link.clone(),
            Arc::new(ScriptedSampler::new(&[])),
            None,
        )
    }

    pub fn drain(rx: &mut broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn status_events(events: &[CoreEvent]) -> Vec<ActivityStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                CoreEvent::StatusChanged { status } => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sample_sequence_sends_on_changes() {
        let link = Arc::new(MockLink::new());
        let orch = orchestrator(&link, Settings::default());
        orch.connect_peripheral().await.unwrap();
        let mut rx = orch.subscribe();

        for sample in [Active, Active, Idle, Idle, Active] {
            orch.observe(sample).await;
        }

        assert_eq!(status_events(&drain(&mut rx)), vec![Active, Idle, Active]);
        assert_eq!(link.sent(), vec![Rgb::RED, Rgb::GREEN, Rgb::RED]);
    }

    #[tokio::test]
    async fn test_identical_send_suppressed() {
        let link = Arc::new(MockLink::new());
        let orch = orchestrator(&link, Settings::default());
        orch.connect_peripheral().await.unwrap();

        assert!(orch.push_color(Rgb::RED).await);
        assert!(!orch.push_color(Rgb::RED).await);
        assert_eq!(link.sent(), vec![Rgb::RED]);
    }

    #[tokio::test]
    async fn test_no_send_while_disconnected() {
        let link = Arc::new(MockLink::new());
        let orch = orchestrator(&link, Settings::default());
        let mut rx = orch.subscribe();

        orch.observe(Active).await;

        assert_eq!(status_events(&drain(&mut rx)), vec![Active]);
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn test_connect_pushes_current_color() {
        let link = Arc::new(MockLink::new());
        let orch = orchestrator(&link, Settings::default());

        orch.observe(Active).await;
        let device = orch.connect_peripheral().await.unwrap();

        assert_eq!(device, MockLink::device());
        assert_eq!(link.sent(), vec![Rgb::RED]);
        let status = orch.status();
        assert_eq!(status.connection, ConnectionState::Connected);
        assert_eq!(status.device, Some(MockLink::device()));
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let link = Arc::new(MockLink::new());
        let orch = orchestrator(&link, Settings::default());
        let mut rx = orch.subscribe();

        orch.connect_peripheral().await.unwrap();
        orch.connect_peripheral().await.unwrap();

        let connected = drain(&mut rx)
            .into_iter()
            .filter(|e| {
                matches!(e, CoreEvent::ConnectionChanged { state: ConnectionState::Connected, .. })
            })
            .count();
        assert_eq!(connected, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let link = Arc::new(MockLink::new().failing_connect());
        let orch = orchestrator(&link, Settings::default());
        let mut rx = orch.subscribe();

        let err = orch.connect_peripheral().await.unwrap_err();

        assert_eq!(err.code(), "connect_failed");
        assert_eq!(orch.status().connection, ConnectionState::Disconnected);
        assert!(orch.status().device.is_none());
        assert!(link.disconnect_count.load(Ordering::SeqCst) >= 1);
        assert!(drain(&mut rx).iter().any(|e| {
            matches!(e, CoreEvent::ConnectionChanged { state: ConnectionState::Failed, .. })
        }));
    }

    #[tokio::test]
    async fn test_discovery_not_found() {
        let link = Arc::new(MockLink::new().without_device());
        let orch = orchestrator(&link, Settings::default());

        let err = orch.connect_peripheral().await.unwrap_err();

        assert!(matches!(err, LinkError::Discovery(DiscoveryError::NotFound { .. })));
        assert_eq!(orch.status().connection, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_manual_serial_port_skips_discovery() {
        let link = Arc::new(MockLink::new().without_device().serial());
        let settings = Settings {
            transport: Transport::Serial,
            serial_port: Some("COM7".to_string()),
            ..Default::default()
        };
        let orch = orchestrator(&link, settings);

        let device = orch.connect_peripheral().await.unwrap();
        assert_eq!(device.id, "COM7");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let link = Arc::new(MockLink::new());
        let orch = orchestrator(&link, Settings::default());
        orch.connect_peripheral().await.unwrap();
        let mut rx = orch.subscribe();

        assert!(orch.disconnect_peripheral().await);
        assert_eq!(orch.status().connection, ConnectionState::Disconnected);
        assert!(!orch.disconnect_peripheral().await);
        assert_eq!(orch.status().connection, ConnectionState::Disconnected);

        assert_eq!(drain(&mut rx).len(), 1);
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_start_stop_are_idempotent() {
        let link = Arc::new(MockLink::new());
        let orch = orchestrator(&link, Settings::default());

        assert!(orch.start_monitoring());
        assert!(!orch.start_monitoring());
        assert!(orch.status().monitoring);

        assert!(orch.stop_monitoring().await);
        assert!(!orch.stop_monitoring().await);
        assert!(!orch.status().monitoring);
    }

    #[tokio::test]
    async fn test_poll_task_feeds_tracker() {
        let link = Arc::new(MockLink::new());
        let settings = Settings {
            poll_interval_secs: 1,
            ..Default::default()
        };
        let orch = Orchestrator::new(
            settings,
            link.clone(),
            Arc::new(ScriptedSampler::new(&[Active, Idle])),
            None,
        );
        let mut rx = orch.subscribe();

        orch.start_monitoring();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        orch.stop_monitoring().await;

        let events = drain(&mut rx);
        assert_eq!(status_events(&events), vec![Active, Idle]);
        assert_eq!(events.first(), Some(&CoreEvent::MonitoringChanged { running: true }));
        assert_eq!(events.last(), Some(&CoreEvent::MonitoringChanged { running: false }));
    }

    #[tokio::test]
    async fn test_set_color_repaints_displayed_status() {
        let link = Arc::new(MockLink::new());
        let orch = orchestrator(&link, Settings::default());
        orch.connect_peripheral().await.unwrap();
        orch.observe(Active).await;

        let blue = Rgb::new(0, 0, 255);
        orch.set_color(ColorSlot::Active, blue).await.unwrap();
        orch.set_color(ColorSlot::Idle, Rgb::new(9, 9, 9)).await.unwrap();

        assert_eq!(link.sent(), vec![Rgb::RED, blue]);
        assert_eq!(orch.status().settings.active_color, blue);
    }

    #[tokio::test]
    async fn test_settings_changes_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let link = Arc::new(MockLink::new());
        let orch = Orchestrator::new(
            Settings::default(),
            link.clone(),
            Arc::new(ScriptedSampler::new(&[])),
            Some(store.clone()),
        );

        orch.set_color(ColorSlot::Idle, Rgb::new(1, 2, 3)).await.unwrap();
        orch.set_filter("desk_light".to_string()).unwrap();

        let saved = store.load().unwrap();
        assert_eq!(saved.idle_color, Rgb::new(1, 2, 3));
        assert_eq!(saved.discovery_filter, "desk_light");
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeouts_keep_session_watched() {
        let link = Arc::new(MockLink::new());
        let settings = Settings {
            scan_timeout_secs: u64::MAX,
            session_check_secs: u64::MAX,
            ..Default::default()
        };
        let orch = orchestrator(&link, settings);

        orch.connect_peripheral().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3601)).await;

        assert_eq!(link.probe_count.load(Ordering::SeqCst), 1);
        assert_eq!(orch.status().connection, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_tears_down_half_open_link() {
        let link = Arc::new(MockLink::new().slow_connect(Duration::from_secs(60)));
        let settings = Settings {
            connect_timeout_secs: 1,
            ..Default::default()
        };
        let orch = orchestrator(&link, settings);

        let err = orch.connect_peripheral().await.unwrap_err();

        assert!(matches!(err, LinkError::Connect(ConnectError::Timeout(_))));
        assert!(!link.is_open());
        assert_eq!(link.disconnect_count.load(Ordering::SeqCst), 1);
        assert_eq!(orch.status().connection, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_resends_unchanged_color() {
        let link = Arc::new(MockLink::new());
        let orch = orchestrator(&link, Settings::default());
        orch.connect_peripheral().await.unwrap();

        orch.observe(Active).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        orch.observe(Active).await;
        assert_eq!(link.sent(), vec![Rgb::RED]);

        tokio::time::sleep(Duration::from_secs(121)).await;
        orch.observe(Active).await;
        assert_eq!(link.sent(), vec![Rgb::RED, Rgb::RED]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_waits_for_inflight_send() {
        let link = Arc::new(MockLink::new().slow_send(Duration::from_secs(2)));
        let orch = orchestrator(&link, Settings::default());
        orch.connect_peripheral().await.unwrap();

        let pusher = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.push_color(Rgb::RED).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(orch.disconnect_peripheral().await);
        assert!(pusher.await.unwrap());

        orch.observe(Idle).await;

        assert_eq!(link.sent(), vec![Rgb::RED]);
        assert_eq!(link.ops(), vec!["connect", "send", "disconnect"]);
    }

    #[tokio::test]
    async fn test_restart_reports_first_sample_again() {
        let link = Arc::new(MockLink::new());
        let orch = Orchestrator::new(
            Settings::default(),
            link.clone(),
            Arc::new(ScriptedSampler::new(&[Active, Active])),
            None,
        );

        orch.start_monitoring();
        tokio::time::sleep(Duration::from_millis(200)).await;
        orch.stop_monitoring().await;
        assert_eq!(orch.status().activity, None);

        let mut rx = orch.subscribe();
        orch.start_monitoring();
        tokio::time::sleep(Duration::from_millis(200)).await;
        orch.stop_monitoring().await;

        assert_eq!(status_events(&drain(&mut rx)), vec![Active]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_disconnect_during_connect_hides_failure() {
        let link = Arc::new(
            MockLink::new()
                .failing_connect()
                .slow_connect(Duration::from_secs(1)),
        );
        let orch = orchestrator(&link, Settings::default());
        let mut rx = orch.subscribe();

        let attempt = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.connect_peripheral().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(orch.disconnect_peripheral().await);
        assert!(attempt.await.unwrap().is_err());

        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| {
            matches!(e, CoreEvent::ConnectionChanged { state: ConnectionState::Failed, .. })
        }));
        assert!(events.iter().any(|e| {
            matches!(e, CoreEvent::ConnectionChanged { state: ConnectionState::Disconnected, .. })
        }));
        assert_eq!(orch.status().connection, ConnectionState::Disconnected);
    }
}
