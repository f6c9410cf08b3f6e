//! Platform boundary: the commands the state machine issues to a BLE central
//! and the events the platform reports back.
//!
//! [`Central`] methods never block and never return an outcome directly. Each
//! one that has an outcome answers later with a [`BleEvent`] on the event
//! channel the backend was created with. Implement it for your BLE stack or a
//! mock.

use std::fmt;

use uuid::Uuid;

/// Power/authorization state of the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Off,
    On,
    Unauthorized,
    Unsupported,
    /// Resetting or switching power.
    Transitioning,
    Unknown,
}

/// Caller-supplied printer identifier: a platform address/UUID or an
/// advertised name. Compared case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `peripheral` is this device, by identifier first and
    /// advertised name second.
    pub fn matches(&self, peripheral: &PeripheralInfo) -> bool {
        peripheral.id == self.0 || peripheral.name.as_deref() == Some(self.0.as_str())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId::new(s)
    }
}

/// A peripheral as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralInfo {
    pub id: String,
    pub name: Option<String>,
}

impl PeripheralInfo {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharProps {
    pub write: bool,
    pub write_without_response: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub service: Uuid,
    pub properties: CharProps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Each write is acknowledged by the printer.
    WithResponse,
    WithoutResponse,
}

/// Characteristic selected for print data and how to write to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteChannel {
    pub characteristic: CharacteristicInfo,
    pub mode: WriteMode,
}

/// Hardware events, delivered in the order the platform produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    AdapterState(AdapterState),
    /// Answer to [`Central::lookup_known`].
    KnownLookup {
        target: DeviceId,
        peripheral: Option<PeripheralInfo>,
    },
    Discovered(PeripheralInfo),
    ScanFailed(String),
    Connected {
        peripheral: String,
    },
    ConnectFailed {
        peripheral: String,
        reason: String,
    },
    Disconnected {
        peripheral: String,
        reason: Option<String>,
    },
    ServicesDiscovered {
        peripheral: String,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        peripheral: String,
        service: Uuid,
        result: Result<Vec<CharacteristicInfo>, String>,
    },
    /// Acknowledgment of a [`WriteMode::WithResponse`] write, or the failure of
    /// any write.
    WriteCompleted {
        peripheral: String,
        result: Result<(), String>,
    },
}

/// Commands a BLE central accepts.
pub trait Central: Send {
    /// Look among bonded/already-known peripherals; answered by
    /// [`BleEvent::KnownLookup`].
    fn lookup_known(&mut self, target: &DeviceId);

    /// Report every advertising peripheral as [`BleEvent::Discovered`].
    fn start_scan(&mut self);

    fn stop_scan(&mut self);

    /// Answered by [`BleEvent::Connected`] or [`BleEvent::ConnectFailed`].
    fn connect(&mut self, peripheral: &PeripheralInfo);

    /// Also cancels a connection attempt in progress.
    fn disconnect(&mut self, peripheral: &PeripheralInfo);

    /// Answered by [`BleEvent::ServicesDiscovered`], services in discovery order.
    fn discover_services(&mut self, peripheral: &PeripheralInfo);

    /// Answered by [`BleEvent::CharacteristicsDiscovered`].
    fn discover_characteristics(&mut self, peripheral: &PeripheralInfo, service: Uuid);

    /// Writes are issued to the device in call order. With
    /// [`WriteMode::WithResponse`] each is answered by
    /// [`BleEvent::WriteCompleted`]; without response only failures are.
    fn write(
        &mut self,
        peripheral: &PeripheralInfo,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    );

    /// Largest single write in bytes, 0 if unknown/unbounded.
    fn max_write_len(&self, peripheral: &PeripheralInfo, mode: WriteMode) -> usize;
}
