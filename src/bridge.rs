//! Async front end.
//!
//! [`PrinterBridge`] is a cheap, cloneable handle. All requests are forwarded to
//! one spawned task that owns the [`RequestCoordinator`] and interleaves caller
//! commands, hardware events and connection deadlines in arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::central::{AdapterState, BleEvent, Central, DeviceId};
use crate::config::BridgeConfig;
use crate::coordinator::RequestCoordinator;
use crate::error::{PrinterError, Result};
use crate::protocol::PrintJob;

/// Bluetooth permission as reported to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    Restricted,
    /// Not asked yet.
    Prompt,
    Unknown,
}

impl From<AdapterState> for PermissionState {
    /// Best guess from adapter state alone, for platforms without an
    /// authorization API.
    fn from(state: AdapterState) -> Self {
        match state {
            AdapterState::On => PermissionState::Granted,
            AdapterState::Unauthorized => PermissionState::Denied,
            _ => PermissionState::Unknown,
        }
    }
}

/// Platform permission layer.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn check(&self) -> PermissionState;

    /// Ask the user if the platform allows it, then report the result.
    async fn request(&self) -> PermissionState;
}

enum Command {
    Print {
        device: DeviceId,
        job: PrintJob,
        reply: oneshot::Sender<Result<()>>,
    },
    Connect {
        device: DeviceId,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        device: DeviceId,
        reply: oneshot::Sender<Result<()>>,
    },
    IsConnected {
        device: DeviceId,
        reply: oneshot::Sender<bool>,
    },
}

/// Handle for sending print jobs to BLE thermal printers.
///
/// - `commands`: queue into the bridge task
/// - `permissions`: platform permission layer
#[derive(Clone)]
pub struct PrinterBridge {
    commands: mpsc::Sender<Command>,
    permissions: Arc<dyn PermissionProvider>,
}

impl PrinterBridge {
    /// Start the bridge task.
    ///
    /// - `central`: BLE backend; its outcomes must arrive on `events`
    /// - `events`: hardware events for `central`
    /// - `config`: timeouts and text encoding
    /// - `permissions`: answers `check_permissions` / `request_permissions`
    ///
    /// Returns the handle and the task. The task ends once every handle is
    /// dropped or the event stream closes; pending requests then fail with
    /// [`PrinterError::Shutdown`].
    pub fn spawn<C>(
        central: C,
        events: mpsc::UnboundedReceiver<BleEvent>,
        config: &BridgeConfig,
        permissions: Arc<dyn PermissionProvider>,
    ) -> (Self, JoinHandle<()>)
    where
        C: Central + 'static,
    {
        let (commands, rx) = mpsc::channel(config.command_buffer.max(1));
        let coordinator = RequestCoordinator::new(central, config);
        let task = tokio::spawn(run(coordinator, rx, events));
        (
            Self {
                commands,
                permissions,
            },
            task,
        )
    }

    /// Print text to the printer `device_id`.
    ///
    /// - `device_id`: platform identifier or advertised name
    /// - `data`: newline-delimited text
    ///
    /// Returns Ok(()) once every byte has been written
    pub async fn print(&self, device_id: &str, data: &str) -> Result<()> {
        self.print_job(DeviceId::new(device_id), PrintJob::Text(data.to_string()))
            .await
    }

    /// Print `qr_data` as a centered QR code. Fails with
    /// [`PrinterError::PayloadTooLarge`] above 800 bytes.
    pub async fn print_qr_code(&self, device_id: &str, qr_data: &str) -> Result<()> {
        self.print_job(DeviceId::new(device_id), PrintJob::QrCode(qr_data.to_string()))
            .await
    }

    pub async fn print_job(&self, device: DeviceId, job: PrintJob) -> Result<()> {
        self.call(|reply| Command::Print { device, job, reply }).await?
    }

    /// Connect and resolve the write channel ahead of the first print.
    pub async fn connect(&self, device_id: &str) -> Result<()> {
        let device = DeviceId::new(device_id);
        self.call(|reply| Command::Connect { device, reply }).await?
    }

    /// Fails with [`PrinterError::Busy`] while a request for `device_id` is in
    /// flight.
    pub async fn disconnect(&self, device_id: &str) -> Result<()> {
        let device = DeviceId::new(device_id);
        self.call(|reply| Command::Disconnect { device, reply }).await?
    }

    pub async fn is_connected(&self, device_id: &str) -> Result<bool> {
        let device = DeviceId::new(device_id);
        self.call(|reply| Command::IsConnected { device, reply }).await
    }

    pub async fn check_permissions(&self) -> PermissionState {
        self.permissions.check().await
    }

    pub async fn request_permissions(&self) -> PermissionState {
        self.permissions.request().await
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| PrinterError::Shutdown)?;
        rx.await.map_err(|_| PrinterError::Shutdown)
    }
}

fn dispatch<C: Central>(coordinator: &mut RequestCoordinator<C>, command: Command) {
    match command {
        Command::Print { device, job, reply } => coordinator.submit(device, job, reply),
        Command::Connect { device, reply } => coordinator.connect(device, reply),
        Command::Disconnect { device, reply } => {
            let _ = reply.send(coordinator.disconnect(&device));
        }
        Command::IsConnected { device, reply } => {
            let _ = reply.send(coordinator.is_connected(&device));
        }
    }
}

async fn run<C: Central>(
    mut coordinator: RequestCoordinator<C>,
    mut commands: mpsc::Receiver<Command>,
    mut events: mpsc::UnboundedReceiver<BleEvent>,
) {
    info!("printer bridge started");
    loop {
        let deadline = coordinator.deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => dispatch(&mut coordinator, command),
                None => {
                    debug!("all bridge handles dropped");
                    break;
                }
            },
            event = events.recv() => match event {
                Some(event) => coordinator.handle_event(event),
                None => {
                    warn!("BLE event stream closed");
                    break;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                coordinator.on_deadline(Instant::now());
            }
        }
    }
    coordinator.shutdown();
    info!("printer bridge stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::mock::MockCentral;
    use std::time::Duration;

    struct FixedPermissions(PermissionState);

    #[async_trait]
    impl PermissionProvider for FixedPermissions {
        async fn check(&self) -> PermissionState {
            self.0
        }

        async fn request(&self) -> PermissionState {
            PermissionState::Granted
        }
    }

    fn spawn(
        config: &BridgeConfig,
    ) -> (PrinterBridge, JoinHandle<()>, mpsc::UnboundedSender<BleEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (bridge, task) = PrinterBridge::spawn(
            MockCentral::with_mtu(20),
            events_rx,
            config,
            Arc::new(FixedPermissions(PermissionState::Prompt)),
        );
        (bridge, task, events_tx)
    }

    #[test]
    fn test_permission_from_adapter_state() {
        assert_eq!(PermissionState::from(AdapterState::On), PermissionState::Granted);
        assert_eq!(PermissionState::from(AdapterState::Unauthorized), PermissionState::Denied);
        assert_eq!(PermissionState::from(AdapterState::Off), PermissionState::Unknown);
    }

    #[test]
    fn test_permission_state_serializes_lowercase() {
        let s = toml::to_string(&std::collections::BTreeMap::from([(
            "bluetooth",
            PermissionState::Prompt,
        )]))
        .unwrap();
        assert_eq!(s.trim(), r#"bluetooth = "prompt""#);
    }

    #[tokio::test]
    async fn test_permissions_delegated() {
        let (bridge, _task, _events) = spawn(&BridgeConfig::default());
        assert_eq!(bridge.check_permissions().await, PermissionState::Prompt);
        assert_eq!(bridge.request_permissions().await, PermissionState::Granted);
    }

    #[tokio::test]
    async fn test_invalid_request_answered_by_task() {
        let (bridge, _task, events) = spawn(&BridgeConfig::default());
        events.send(BleEvent::AdapterState(AdapterState::On)).unwrap();
        assert!(matches!(
            bridge.print("", "hello").await,
            Err(PrinterError::InvalidRequest(_))
        ));
        assert_eq!(bridge.is_connected("AA:01").await, Ok(false));
        assert_eq!(bridge.disconnect("AA:01").await, Ok(()));
    }

    #[tokio::test]
    async fn test_event_stream_closing_rejects_pending() {
        let (bridge, task, events) = spawn(&BridgeConfig::default());
        events.send(BleEvent::AdapterState(AdapterState::On)).unwrap();
        let pending = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.print("AA:01", "hello").await }
        });
        tokio::task::yield_now().await;
        // commands are handled in order, so the print is pending by now
        assert_eq!(bridge.is_connected("AA:01").await, Ok(false));
        drop(events);
        task.await.unwrap();

        assert_eq!(pending.await.unwrap(), Err(PrinterError::Shutdown));
        assert_eq!(bridge.connect("AA:01").await, Err(PrinterError::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_deadline_fires() {
        let config = BridgeConfig {
            scan_timeout_ms: 1_000,
            ..BridgeConfig::default()
        };
        let (bridge, _task, events) = spawn(&config);
        events.send(BleEvent::AdapterState(AdapterState::On)).unwrap();

        let started = Instant::now();
        let result = bridge.connect("AA:01").await;
        assert!(matches!(result, Err(PrinterError::DeviceNotFound(_))));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_dispatch_is_connected_false_for_unknown() {
        let mut coordinator = RequestCoordinator::new(MockCentral::default(), &BridgeConfig::default());
        let (tx, mut rx) = oneshot::channel();
        dispatch(
            &mut coordinator,
            Command::IsConnected {
                device: "AA:01".into(),
                reply: tx,
            },
        );
        assert_eq!(rx.try_recv(), Ok(false));
        assert!(coordinator.central().calls.is_empty());
    }
}
