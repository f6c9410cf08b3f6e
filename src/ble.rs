//! btleplug backend.
//!
//! [`BtleplugCentral`] turns the fire-and-forget [`Central`] commands into
//! spawned btleplug calls and reports their outcomes, plus the adapter's own
//! event stream, as [`BleEvent`]s. Its methods must be called from inside a
//! tokio runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, CentralState, CharPropFlags, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::bridge::{PermissionProvider, PermissionState, PrinterBridge};
use crate::central::{
    AdapterState, BleEvent, Central, CharProps, CharacteristicInfo, DeviceId, PeripheralInfo,
    WriteMode,
};
use crate::config::BridgeConfig;
use crate::error::{PrinterError, Result};

/// A peripheral seen by [`scan`] or [`known_devices`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Peripheral handles by identifier, filled as peripherals are seen.
type PeripheralCache = Arc<Mutex<HashMap<String, Peripheral>>>;

struct WriteOp {
    peripheral: String,
    characteristic: CharacteristicInfo,
    data: Vec<u8>,
    mode: WriteMode,
}

pub struct BtleplugCentral {
    adapter: Adapter,
    events: mpsc::UnboundedSender<BleEvent>,
    peripherals: PeripheralCache,
    /// Queue into the single writer task, which keeps writes in call order.
    writes: mpsc::UnboundedSender<WriteOp>,
    max_write_len: usize,
}

/// First Bluetooth adapter on the system.
pub async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PrinterError::Ble("no Bluetooth adapters found".into()))
}

fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::On,
        CentralState::PoweredOff => AdapterState::Off,
        _ => AdapterState::Unknown,
    }
}

fn char_info(c: &btleplug::api::Characteristic) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid: c.uuid,
        service: c.service_uuid,
        properties: CharProps {
            write: c.properties.contains(CharPropFlags::WRITE),
            write_without_response: c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        },
    }
}

async fn describe(p: &Peripheral) -> DeviceInfo {
    let props = p.properties().await.ok().flatten();
    DeviceInfo {
        id: p.id().to_string(),
        name: props.as_ref().and_then(|p| p.local_name.clone()),
        rssi: props.and_then(|p| p.rssi),
    }
}

async fn peripheral_info(p: &Peripheral) -> PeripheralInfo {
    let info = describe(p).await;
    PeripheralInfo {
        id: info.id,
        name: info.name,
    }
}

/// Cached handle for `id`, falling back to the adapter's peripheral list.
async fn find_peripheral(adapter: &Adapter, cache: &PeripheralCache, id: &str) -> Option<Peripheral> {
    if let Some(p) = cache.lock().await.get(id) {
        return Some(p.clone());
    }
    let p = adapter
        .peripherals()
        .await
        .ok()?
        .into_iter()
        .find(|p| p.id().to_string() == id)?;
    cache.lock().await.insert(id.to_string(), p.clone());
    Some(p)
}

impl BtleplugCentral {
    /// Open the first adapter and start forwarding its events.
    ///
    /// - `config`: `max_write_len` is taken from here
    ///
    /// Returns the central and the event stream to hand to [`PrinterBridge::spawn`]
    pub async fn new(config: &BridgeConfig) -> Result<(Self, mpsc::UnboundedReceiver<BleEvent>)> {
        let adapter = first_adapter().await?;
        if let Ok(info) = adapter.adapter_info().await {
            info!("using Bluetooth adapter {}", info);
        }
        let (events, events_rx) = mpsc::unbounded_channel();
        let peripherals: PeripheralCache = Arc::new(Mutex::new(HashMap::new()));

        let stream = adapter.events().await?;
        // adapters that cannot report power state are assumed usable
        let state = match adapter.adapter_state().await {
            Ok(state) => adapter_state(state),
            Err(e) => {
                debug!("adapter state unavailable ({}), assuming powered on", e);
                AdapterState::On
            }
        };
        let _ = events.send(BleEvent::AdapterState(state));
        tokio::spawn(pump_events(
            adapter.clone(),
            stream,
            events.clone(),
            peripherals.clone(),
        ));

        let (writes, writes_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(
            adapter.clone(),
            writes_rx,
            events.clone(),
            peripherals.clone(),
        ));

        Ok((
            Self {
                adapter,
                events,
                peripherals,
                writes,
                max_write_len: config.max_write_len,
            },
            events_rx,
        ))
    }

    fn emit(&self, event: BleEvent) {
        emit(&self.events, event);
    }

    fn with_peripheral<F, Fut>(&self, id: &str, f: F)
    where
        F: FnOnce(Option<Peripheral>, mpsc::UnboundedSender<BleEvent>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let adapter = self.adapter.clone();
        let cache = self.peripherals.clone();
        let events = self.events.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let p = find_peripheral(&adapter, &cache, &id).await;
            f(p, events).await;
        });
    }
}

fn emit(events: &mpsc::UnboundedSender<BleEvent>, event: BleEvent) {
    trace!("event {:?}", event);
    if events.send(event).is_err() {
        debug!("event dropped, bridge is gone");
    }
}

async fn pump_events(
    adapter: Adapter,
    mut stream: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    events: mpsc::UnboundedSender<BleEvent>,
    cache: PeripheralCache,
) {
    while let Some(event) = stream.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(p) = adapter.peripheral(&id).await else {
                    continue;
                };
                let info = peripheral_info(&p).await;
                cache.lock().await.insert(info.id.clone(), p);
                emit(&events, BleEvent::Discovered(info));
            }
            CentralEvent::DeviceDisconnected(id) => emit(
                &events,
                BleEvent::Disconnected {
                    peripheral: id.to_string(),
                    reason: None,
                },
            ),
            CentralEvent::StateUpdate(state) => {
                emit(&events, BleEvent::AdapterState(adapter_state(state)))
            }
            _ => {}
        }
    }
    warn!("Bluetooth adapter event stream ended");
}

async fn run_writer(
    adapter: Adapter,
    mut ops: mpsc::UnboundedReceiver<WriteOp>,
    events: mpsc::UnboundedSender<BleEvent>,
    cache: PeripheralCache,
) {
    while let Some(op) = ops.recv().await {
        let result = write_op(&adapter, &cache, &op).await;
        if let Err(e) = &result {
            warn!("write to {} failed: {}", op.peripheral, e);
        }
        if op.mode == WriteMode::WithResponse || result.is_err() {
            emit(
                &events,
                BleEvent::WriteCompleted {
                    peripheral: op.peripheral,
                    result,
                },
            );
        }
    }
}

async fn write_op(
    adapter: &Adapter,
    cache: &PeripheralCache,
    op: &WriteOp,
) -> std::result::Result<(), String> {
    let p = find_peripheral(adapter, cache, &op.peripheral)
        .await
        .ok_or_else(|| format!("unknown peripheral {}", op.peripheral))?;
    let characteristic = p
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == op.characteristic.uuid && c.service_uuid == op.characteristic.service)
        .ok_or_else(|| format!("characteristic {} not found", op.characteristic.uuid))?;
    let write_type = match op.mode {
        WriteMode::WithResponse => WriteType::WithResponse,
        WriteMode::WithoutResponse => WriteType::WithoutResponse,
    };
    trace!("write {} bytes to {}", op.data.len(), characteristic.uuid);
    p.write(&characteristic, &op.data, write_type)
        .await
        .map_err(|e| e.to_string())
}

impl Central for BtleplugCentral {
    fn lookup_known(&mut self, target: &DeviceId) {
        let adapter = self.adapter.clone();
        let cache = self.peripherals.clone();
        let events = self.events.clone();
        let target = target.clone();
        tokio::spawn(async move {
            let peripherals = match adapter.peripherals().await {
                Ok(peripherals) => peripherals,
                Err(e) => {
                    warn!("could not list known peripherals: {}", e);
                    Vec::new()
                }
            };
            let mut found = None;
            for p in peripherals {
                let info = peripheral_info(&p).await;
                if target.matches(&info) {
                    cache.lock().await.insert(info.id.clone(), p);
                    found = Some(info);
                    break;
                }
            }
            emit(&events, BleEvent::KnownLookup { target, peripheral: found });
        });
    }

    fn start_scan(&mut self) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                error!("failed to start scan: {}", e);
                emit(&events, BleEvent::ScanFailed(e.to_string()));
            }
        });
    }

    fn stop_scan(&mut self) {
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!("stop scan: {}", e);
            }
        });
    }

    fn connect(&mut self, peripheral: &PeripheralInfo) {
        let id = peripheral.id.clone();
        self.with_peripheral(&peripheral.id, move |p, events| async move {
            let event = match p {
                Some(p) => match p.connect().await {
                    Ok(()) => BleEvent::Connected { peripheral: id },
                    Err(e) => BleEvent::ConnectFailed {
                        peripheral: id,
                        reason: e.to_string(),
                    },
                },
                None => BleEvent::ConnectFailed {
                    reason: format!("peripheral {} is not known to the adapter", id),
                    peripheral: id,
                },
            };
            emit(&events, event);
        });
    }

    fn disconnect(&mut self, peripheral: &PeripheralInfo) {
        self.with_peripheral(&peripheral.id, |p, _| async move {
            if let Some(p) = p {
                if let Err(e) = p.disconnect().await {
                    debug!("disconnect: {}", e);
                }
            }
        });
    }

    fn discover_services(&mut self, peripheral: &PeripheralInfo) {
        let id = peripheral.id.clone();
        self.with_peripheral(&peripheral.id, move |p, events| async move {
            let result = match p {
                Some(p) => match p.discover_services().await {
                    Ok(()) => Ok(p.services().iter().map(|s| s.uuid).collect()),
                    Err(e) => Err(e.to_string()),
                },
                None => Err(format!("unknown peripheral {}", id)),
            };
            emit(&events, BleEvent::ServicesDiscovered { peripheral: id, result });
        });
    }

    fn discover_characteristics(&mut self, peripheral: &PeripheralInfo, service: Uuid) {
        let id = peripheral.id.clone();
        self.with_peripheral(&peripheral.id, move |p, events| async move {
            // btleplug resolves characteristics together with services
            let result = p
                .ok_or_else(|| format!("unknown peripheral {}", id))
                .and_then(|p| {
                    p.services()
                        .into_iter()
                        .find(|s| s.uuid == service)
                        .map(|s| s.characteristics.iter().map(char_info).collect())
                        .ok_or_else(|| format!("service {} not found", service))
                });
            emit(
                &events,
                BleEvent::CharacteristicsDiscovered {
                    peripheral: id,
                    service,
                    result,
                },
            );
        });
    }

    fn write(
        &mut self,
        peripheral: &PeripheralInfo,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    ) {
        let op = WriteOp {
            peripheral: peripheral.id.clone(),
            characteristic: characteristic.clone(),
            data: data.to_vec(),
            mode,
        };
        if self.writes.send(op).is_err() {
            self.emit(BleEvent::WriteCompleted {
                peripheral: peripheral.id.clone(),
                result: Err("writer task stopped".into()),
            });
        }
    }

    fn max_write_len(&self, _peripheral: &PeripheralInfo, _mode: WriteMode) -> usize {
        self.max_write_len
    }
}

/// Permission state derived from adapter power state.
pub struct AdapterPermissions {
    adapter: Adapter,
}

impl AdapterPermissions {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl PermissionProvider for AdapterPermissions {
    async fn check(&self) -> PermissionState {
        match self.adapter.adapter_state().await {
            Ok(state) => adapter_state(state).into(),
            Err(_) => PermissionState::Unknown,
        }
    }

    /// A short scan is what makes most platforms show their prompt.
    async fn request(&self) -> PermissionState {
        if self.adapter.start_scan(ScanFilter::default()).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = self.adapter.stop_scan().await;
        }
        self.check().await
    }
}

/// Open the first adapter and start a bridge on it.
///
/// Returns the bridge handle and its task
pub async fn open(config: &BridgeConfig) -> Result<(PrinterBridge, JoinHandle<()>)> {
    let (central, events) = BtleplugCentral::new(config).await?;
    let permissions = Arc::new(AdapterPermissions::new(central.adapter.clone()));
    Ok(PrinterBridge::spawn(central, events, config, permissions))
}

/// Scan for BLE devices.
///
/// - `timeout`: how long to listen for advertisements
///
/// Returns every peripheral the adapter knows after the scan
pub async fn scan(timeout: Duration) -> Result<Vec<DeviceInfo>> {
    let adapter = first_adapter().await?;
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(timeout).await;
    adapter.stop_scan().await?;
    list(&adapter).await
}

/// Peripherals the adapter already knows (bonded or cached), without scanning.
pub async fn known_devices() -> Result<Vec<DeviceInfo>> {
    let adapter = first_adapter().await?;
    list(&adapter).await
}

async fn list(adapter: &Adapter) -> Result<Vec<DeviceInfo>> {
    let mut out = Vec::new();
    for p in adapter.peripherals().await? {
        out.push(describe(&p).await);
    }
    Ok(out)
}
