//! Locating and connecting to one target printer.
//!
//! ```text
//! Idle -> AwaitingAdapterOn -> LookingUpKnown -> [Scanning] -> Connecting -> Connected
//! ```
//!
//! Any state falls back to `Idle` on adapter loss, connect failure, timeout or
//! disconnect; the failure is handed to the caller as [`LinkStep::Failed`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::central::{AdapterState, Central, DeviceId, PeripheralInfo};
use crate::error::PrinterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    AwaitingAdapterOn { target: DeviceId },
    LookingUpKnown { target: DeviceId },
    Scanning { target: DeviceId },
    Connecting { target: DeviceId, peripheral: PeripheralInfo },
    Connected { target: DeviceId, peripheral: PeripheralInfo },
}

/// What a connection event meant for the request waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStep {
    /// Event did not concern the current attempt.
    Ignored,
    /// Attempt still in progress.
    Waiting,
    Connected(PeripheralInfo),
    /// Attempt or connection is gone; the manager is back to `Idle`.
    Failed(PrinterError),
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub adapter: Duration,
    pub scan: Duration,
    pub connect: Duration,
}

/// Owns the peripheral handle while an attempt or connection exists.
pub struct ConnectionManager {
    state: LinkState,
    deadline: Option<Instant>,
    /// Peripheral we asked to disconnect whose `Disconnected` event is still due.
    releasing: Option<String>,
    timeouts: Timeouts,
}

impl ConnectionManager {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            state: LinkState::Idle,
            deadline: None,
            releasing: None,
            timeouts,
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Target of the current attempt or connection.
    pub fn target(&self) -> Option<&DeviceId> {
        match &self.state {
            LinkState::Idle => None,
            LinkState::AwaitingAdapterOn { target }
            | LinkState::LookingUpKnown { target }
            | LinkState::Scanning { target }
            | LinkState::Connecting { target, .. }
            | LinkState::Connected { target, .. } => Some(target),
        }
    }

    /// Peripheral being connected to or connected.
    pub fn peripheral(&self) -> Option<&PeripheralInfo> {
        match &self.state {
            LinkState::Connecting { peripheral, .. } | LinkState::Connected { peripheral, .. } => {
                Some(peripheral)
            }
            _ => None,
        }
    }

    /// True if `device` names the current attempt or connection, by the id it
    /// was requested with or, once a peripheral is known, by its identifier or
    /// advertised name.
    pub fn refers_to(&self, device: &DeviceId) -> bool {
        self.target() == Some(device) || self.peripheral().is_some_and(|p| device.matches(p))
    }

    /// Connected peripheral, if `target` names it.
    pub fn connected_to(&self, target: &DeviceId) -> Option<&PeripheralInfo> {
        match &self.state {
            LinkState::Connected { target: t, peripheral }
                if t == target || target.matches(peripheral) =>
            {
                Some(peripheral)
            }
            _ => None,
        }
    }

    pub fn connected_peripheral(&self) -> Option<&PeripheralInfo> {
        match &self.state {
            LinkState::Connected { peripheral, .. } => Some(peripheral),
            _ => None,
        }
    }

    /// Start an attempt for `target`, releasing whatever is held now.
    ///
    /// Returns `Connected` at once if `target` is already connected.
    pub fn request<C: Central>(
        &mut self,
        central: &mut C,
        adapter: AdapterState,
        target: DeviceId,
    ) -> LinkStep {
        if let Some(peripheral) = self.connected_to(&target) {
            return LinkStep::Connected(peripheral.clone());
        }
        if self.refers_to(&target) {
            return LinkStep::Waiting;
        }

        match adapter {
            AdapterState::Unauthorized | AdapterState::Unsupported => {
                return LinkStep::Failed(PrinterError::AdapterUnavailable(format!(
                    "adapter is {:?}",
                    adapter
                )));
            }
            _ => {}
        }

        self.release(central);

        if adapter != AdapterState::On {
            info!("Bluetooth is {:?}, waiting for it to power on before connecting to {}", adapter, target);
            self.state = LinkState::AwaitingAdapterOn { target };
            self.deadline = Some(Instant::now() + self.timeouts.adapter);
            return LinkStep::Waiting;
        }
        self.begin_lookup(central, target)
    }

    fn begin_lookup<C: Central>(&mut self, central: &mut C, target: DeviceId) -> LinkStep {
        debug!("looking up known peripheral {}", target);
        central.lookup_known(&target);
        self.state = LinkState::LookingUpKnown { target };
        self.deadline = Some(Instant::now() + self.timeouts.scan);
        LinkStep::Waiting
    }

    fn begin_connect<C: Central>(
        &mut self,
        central: &mut C,
        target: DeviceId,
        peripheral: PeripheralInfo,
    ) -> LinkStep {
        info!("connecting to {} ({})", peripheral.label(), peripheral.id);
        central.connect(&peripheral);
        self.state = LinkState::Connecting { target, peripheral };
        self.deadline = Some(Instant::now() + self.timeouts.connect);
        LinkStep::Waiting
    }

    fn fail(&mut self, err: PrinterError) -> LinkStep {
        self.state = LinkState::Idle;
        self.deadline = None;
        LinkStep::Failed(err)
    }

    pub fn on_adapter_state<C: Central>(&mut self, central: &mut C, state: AdapterState) -> LinkStep {
        match (state, &self.state) {
            (_, LinkState::Idle) => LinkStep::Ignored,
            (AdapterState::On, LinkState::AwaitingAdapterOn { target }) => {
                let target = target.clone();
                info!("Bluetooth powered on, resuming connection to {}", target);
                self.begin_lookup(central, target)
            }
            (AdapterState::On | AdapterState::Unknown, _) => LinkStep::Ignored,
            (AdapterState::Transitioning, LinkState::AwaitingAdapterOn { .. }) => LinkStep::Ignored,
            (lost, _) => {
                warn!("Bluetooth state changed to {:?}, dropping connection state", lost);
                self.release(central);
                self.fail(PrinterError::AdapterUnavailable(format!(
                    "adapter is {:?}",
                    lost
                )))
            }
        }
    }

    pub fn on_known_lookup<C: Central>(
        &mut self,
        central: &mut C,
        target: &DeviceId,
        found: Option<PeripheralInfo>,
    ) -> LinkStep {
        let LinkState::LookingUpKnown { target: current } = &self.state else {
            return LinkStep::Ignored;
        };
        if current != target {
            return LinkStep::Ignored;
        }
        let target = target.clone();
        match found {
            Some(peripheral) => {
                debug!("found known peripheral {}", peripheral.label());
                self.begin_connect(central, target, peripheral)
            }
            None => {
                info!("{} not among known peripherals, scanning", target);
                central.start_scan();
                self.state = LinkState::Scanning { target };
                LinkStep::Waiting
            }
        }
    }

    pub fn on_discovered<C: Central>(&mut self, central: &mut C, peripheral: PeripheralInfo) -> LinkStep {
        let LinkState::Scanning { target } = &self.state else {
            return LinkStep::Ignored;
        };
        if !target.matches(&peripheral) {
            return LinkStep::Ignored;
        }
        let target = target.clone();
        info!("found target peripheral {}", peripheral.label());
        central.stop_scan();
        self.begin_connect(central, target, peripheral)
    }

    pub fn on_scan_failed(&mut self, reason: &str) -> LinkStep {
        let LinkState::Scanning { target } = &self.state else {
            return LinkStep::Ignored;
        };
        let err = PrinterError::DeviceNotFound(format!("{}: scan failed: {}", target, reason));
        self.fail(err)
    }

    pub fn on_connected(&mut self, peripheral_id: &str) -> LinkStep {
        if self.releasing.as_deref() == Some(peripheral_id) {
            self.releasing = None;
        }
        let LinkState::Connecting { target, peripheral } = &self.state else {
            return LinkStep::Ignored;
        };
        if peripheral.id != peripheral_id {
            return LinkStep::Ignored;
        }
        info!("connected to {}", peripheral.label());
        let (target, peripheral) = (target.clone(), peripheral.clone());
        self.state = LinkState::Connected {
            target,
            peripheral: peripheral.clone(),
        };
        self.deadline = None;
        LinkStep::Connected(peripheral)
    }

    pub fn on_connect_failed(&mut self, peripheral_id: &str, reason: &str) -> LinkStep {
        match &self.state {
            LinkState::Connecting { peripheral, .. } if peripheral.id == peripheral_id => {
                warn!("failed to connect to {}: {}", peripheral.label(), reason);
                self.fail(PrinterError::ConnectionFailed(reason.to_string()))
            }
            _ => LinkStep::Ignored,
        }
    }

    pub fn on_disconnected(&mut self, peripheral_id: &str, reason: Option<&str>) -> LinkStep {
        if self.releasing.as_deref() == Some(peripheral_id) {
            debug!("released peripheral {} disconnected", peripheral_id);
            self.releasing = None;
            return LinkStep::Ignored;
        }
        match &self.state {
            LinkState::Connecting { peripheral, .. } | LinkState::Connected { peripheral, .. }
                if peripheral.id == peripheral_id =>
            {
                let reason = reason.unwrap_or("connection lost");
                warn!("disconnected from {}: {}", peripheral.label(), reason);
                self.fail(PrinterError::Disconnected(reason.to_string()))
            }
            _ => LinkStep::Ignored,
        }
    }

    /// Expire the current phase if its deadline is at or before `now`.
    pub fn on_deadline<C: Central>(&mut self, central: &mut C, now: Instant) -> LinkStep {
        match self.deadline {
            Some(deadline) if deadline <= now => {}
            _ => return LinkStep::Ignored,
        }
        match self.state.clone() {
            LinkState::Idle | LinkState::Connected { .. } => {
                self.deadline = None;
                LinkStep::Ignored
            }
            LinkState::AwaitingAdapterOn { target } => {
                warn!("Bluetooth did not power on in time for {}", target);
                self.fail(PrinterError::AdapterUnavailable(
                    "timed out waiting for Bluetooth to power on".into(),
                ))
            }
            LinkState::LookingUpKnown { target } => {
                warn!("lookup for {} timed out", target);
                self.fail(PrinterError::DeviceNotFound(format!("{}: scan timed out", target)))
            }
            LinkState::Scanning { target } => {
                warn!("scan for {} timed out", target);
                central.stop_scan();
                self.fail(PrinterError::DeviceNotFound(format!("{}: scan timed out", target)))
            }
            LinkState::Connecting { peripheral, .. } => {
                warn!("connection to {} timed out", peripheral.label());
                central.disconnect(&peripheral);
                self.releasing = Some(peripheral.id);
                self.fail(PrinterError::ConnectionFailed("connection timed out".into()))
            }
        }
    }

    /// Drop the current attempt or connection without reporting a failure.
    pub fn release<C: Central>(&mut self, central: &mut C) {
        match std::mem::replace(&mut self.state, LinkState::Idle) {
            LinkState::Scanning { .. } => central.stop_scan(),
            LinkState::Connecting { peripheral, .. } | LinkState::Connected { peripheral, .. } => {
                info!("disconnecting from {}", peripheral.label());
                central.disconnect(&peripheral);
                self.releasing = Some(peripheral.id);
            }
            _ => {}
        }
        self.deadline = None;
    }
}
