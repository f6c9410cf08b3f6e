//! Top-level request state machine.
//!
//! [`RequestCoordinator`] owns the [`Central`], the connection, the selected
//! write channel and the caller replies. It is synchronous: every call either
//! issues commands to the central or answers a reply, and all waiting happens
//! between [`BleEvent`]s. [`crate::bridge`] runs it on a single task.
//!
//! At most one print and one connect-only request are pending at a time, both
//! for the same printer. Each reply is a `oneshot` sender that is consumed when
//! the request is answered.

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::central::{AdapterState, BleEvent, Central, DeviceId, WriteChannel};
use crate::config::BridgeConfig;
use crate::connection::{ConnectionManager, LinkStep, Timeouts};
use crate::error::{PrinterError, Result};
use crate::protocol::{PrintJob, TextEncoding};
use crate::resolver::{CharacteristicResolver, Resolution};
use crate::transmitter::{FrameTransmitter, Progress};

/// Where the caller's answer goes.
pub type Reply = oneshot::Sender<Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    ResolvingCharacteristic,
    Transmitting,
}

struct PendingPrint {
    target: DeviceId,
    transmitter: FrameTransmitter,
    reply: Reply,
    started: bool,
}

struct PendingConnect {
    target: DeviceId,
    reply: Reply,
}

pub struct RequestCoordinator<C: Central> {
    central: C,
    adapter: AdapterState,
    link: ConnectionManager,
    resolver: Option<CharacteristicResolver>,
    channel: Option<WriteChannel>,
    print: Option<PendingPrint>,
    connect: Option<PendingConnect>,
    encoding: TextEncoding,
}

fn answer(reply: Reply, result: Result<()>) {
    // the caller may have stopped waiting
    let _ = reply.send(result);
}

fn validate(device: &DeviceId) -> Result<()> {
    if device.as_str().trim().is_empty() {
        return Err(PrinterError::InvalidRequest("device id is empty".into()));
    }
    Ok(())
}

impl<C: Central> RequestCoordinator<C> {
    pub fn new(central: C, config: &BridgeConfig) -> Self {
        let timeouts = Timeouts {
            adapter: config.adapter_timeout(),
            scan: config.scan_timeout(),
            connect: config.connect_timeout(),
        };
        Self {
            central,
            adapter: AdapterState::Unknown,
            link: ConnectionManager::new(timeouts),
            resolver: None,
            channel: None,
            print: None,
            connect: None,
            encoding: config.text_encoding(),
        }
    }

    pub fn central(&self) -> &C {
        &self.central
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter
    }

    pub fn phase(&self) -> Phase {
        if self.print.is_none() && self.connect.is_none() {
            Phase::Idle
        } else if self.print.as_ref().is_some_and(|p| p.started) {
            Phase::Transmitting
        } else if self.resolver.is_some() {
            Phase::ResolvingCharacteristic
        } else {
            Phase::Connecting
        }
    }

    /// True if `device` is connected, whether or not its channel is resolved.
    pub fn is_connected(&self, device: &DeviceId) -> bool {
        self.link.connected_to(device).is_some()
    }

    /// Earliest instant [`on_deadline`](Self::on_deadline) must be called.
    pub fn deadline(&self) -> Option<Instant> {
        self.link.deadline()
    }

    /// Accept a print job for `device`; `reply` is answered once it has been
    /// written out or has failed.
    pub fn submit(&mut self, device: DeviceId, job: PrintJob, reply: Reply) {
        if let Err(e) = validate(&device) {
            return answer(reply, Err(e));
        }
        if self.print.is_some() {
            warn!("rejecting print for {}: another print is in progress", device);
            return answer(
                reply,
                Err(PrinterError::Busy(
                    "Another print operation is already in progress".into(),
                )),
            );
        }
        if let Some(connect) = &self.connect {
            if !self.same_device(&connect.target, &device) {
                warn!("rejecting print for {}: connecting to {}", device, connect.target);
                let reason = format!("Connection to {} is in progress", connect.target);
                return answer(reply, Err(PrinterError::Busy(reason)));
            }
        }
        let frames = match job.encode(&self.encoding) {
            Ok(frames) => frames,
            Err(e) => return answer(reply, Err(e)),
        };

        info!("print job for {}: {} frames", device, frames.len());
        self.print = Some(PendingPrint {
            target: device.clone(),
            transmitter: FrameTransmitter::new(frames),
            reply,
            started: false,
        });
        self.ensure_channel(device);
    }

    /// Connect to `device` and resolve its write channel without printing.
    pub fn connect(&mut self, device: DeviceId, reply: Reply) {
        if let Err(e) = validate(&device) {
            return answer(reply, Err(e));
        }
        if let Some(connect) = &self.connect {
            let reason = format!("Connection to {} is already in progress", connect.target);
            return answer(reply, Err(PrinterError::Busy(reason)));
        }
        if let Some(print) = &self.print {
            if !self.same_device(&print.target, &device) {
                warn!("rejecting connect to {}: printing to {}", device, print.target);
                let reason = format!("Printing to {} is in progress", print.target);
                return answer(reply, Err(PrinterError::Busy(reason)));
            }
        }

        self.connect = Some(PendingConnect {
            target: device.clone(),
            reply,
        });
        self.ensure_channel(device);
    }

    /// Drop the connection to `device`. Not connected is not an error.
    pub fn disconnect(&mut self, device: &DeviceId) -> Result<()> {
        validate(device)?;
        let in_flight = self.print.as_ref().is_some_and(|p| self.same_device(&p.target, device))
            || self.connect.as_ref().is_some_and(|c| self.same_device(&c.target, device));
        if in_flight {
            return Err(PrinterError::Busy(format!(
                "A request for {} is in progress",
                device
            )));
        }
        if self.link.refers_to(device) {
            self.link.release(&mut self.central);
            self.resolver = None;
            self.channel = None;
        }
        Ok(())
    }

    /// Reject everything pending and drop the connection.
    pub fn shutdown(&mut self) {
        debug!("coordinator shutting down");
        self.link.release(&mut self.central);
        self.fail_all(PrinterError::Shutdown);
    }

    pub fn on_deadline(&mut self, now: Instant) {
        let step = self.link.on_deadline(&mut self.central, now);
        self.apply_link_step(step);
    }

    pub fn handle_event(&mut self, event: BleEvent) {
        let step = match event {
            BleEvent::AdapterState(state) => {
                if state != self.adapter {
                    debug!("adapter state {:?} -> {:?}", self.adapter, state);
                }
                self.adapter = state;
                self.link.on_adapter_state(&mut self.central, state)
            }
            BleEvent::KnownLookup { target, peripheral } => {
                self.link.on_known_lookup(&mut self.central, &target, peripheral)
            }
            BleEvent::Discovered(peripheral) => self.link.on_discovered(&mut self.central, peripheral),
            BleEvent::ScanFailed(reason) => self.link.on_scan_failed(&reason),
            BleEvent::Connected { peripheral } => self.link.on_connected(&peripheral),
            BleEvent::ConnectFailed { peripheral, reason } => {
                self.link.on_connect_failed(&peripheral, &reason)
            }
            BleEvent::Disconnected { peripheral, reason } => {
                self.link.on_disconnected(&peripheral, reason.as_deref())
            }
            BleEvent::ServicesDiscovered { peripheral, result } => {
                if let Some(resolver) = self.resolver.as_mut() {
                    let resolution = resolver.on_services(&mut self.central, &peripheral, result);
                    self.apply_resolution(resolution);
                }
                return;
            }
            BleEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => {
                if let Some(resolver) = self.resolver.as_mut() {
                    let resolution =
                        resolver.on_characteristics(&mut self.central, &peripheral, service, result);
                    self.apply_resolution(resolution);
                }
                return;
            }
            BleEvent::WriteCompleted { peripheral, result } => {
                self.on_write_completed(&peripheral, result);
                return;
            }
        };
        self.apply_link_step(step);
    }

    /// True if `a` and `b` name the same printer: equal ids, or both matching
    /// the peripheral of the current attempt.
    fn same_device(&self, a: &DeviceId, b: &DeviceId) -> bool {
        a == b || (self.link.refers_to(a) && self.link.refers_to(b))
    }

    fn ensure_channel(&mut self, target: DeviceId) {
        if self.link.connected_to(&target).is_some() {
            if self.channel.is_some() {
                return self.channel_ready();
            }
            if self.resolver.is_some() {
                return;
            }
        }
        if !self.link.refers_to(&target) {
            self.resolver = None;
            self.channel = None;
        }
        let step = self.link.request(&mut self.central, self.adapter, target);
        self.apply_link_step(step);
    }

    fn apply_link_step(&mut self, step: LinkStep) {
        match step {
            LinkStep::Ignored | LinkStep::Waiting => {}
            LinkStep::Connected(peripheral) => {
                if self.channel.is_some() {
                    self.channel_ready();
                } else if self.resolver.is_none() {
                    self.resolver = Some(CharacteristicResolver::start(&mut self.central, peripheral));
                }
            }
            LinkStep::Failed(e) => self.fail_all(e),
        }
    }

    fn apply_resolution(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Ignored | Resolution::Waiting => {}
            Resolution::Found(channel) => {
                self.resolver = None;
                self.channel = Some(channel);
                self.channel_ready();
            }
            Resolution::Failed(e) => {
                warn!("characteristic resolution failed: {}", e);
                self.link.release(&mut self.central);
                self.fail_all(e);
            }
        }
    }

    /// Write channel is usable: answer the connect waiter and start the print.
    fn channel_ready(&mut self) {
        if let Some(connect) = self.connect.take() {
            info!("connected to {}", connect.target);
            answer(connect.reply, Ok(()));
        }

        let (Some(peripheral), Some(channel)) =
            (self.link.connected_peripheral().cloned(), self.channel.clone())
        else {
            return;
        };
        let Some(print) = self.print.as_mut().filter(|p| !p.started) else {
            return;
        };
        print.started = true;
        let progress = print.transmitter.start(&mut self.central, &peripheral, &channel);
        self.apply_progress(progress);
    }

    fn on_write_completed(&mut self, peripheral_id: &str, result: std::result::Result<(), String>) {
        let (Some(peripheral), Some(channel)) =
            (self.link.connected_peripheral().cloned(), self.channel.clone())
        else {
            return;
        };
        if peripheral.id != peripheral_id {
            return;
        }
        let Some(print) = self.print.as_mut().filter(|p| p.started) else {
            if let Err(e) = result {
                warn!("write to {} failed after its job ended: {}", peripheral.label(), e);
            }
            return;
        };
        if !print.transmitter.is_awaiting_ack() && result.is_ok() {
            debug!("unexpected write acknowledgment from {}", peripheral.label());
            return;
        }
        let progress = print
            .transmitter
            .on_write_completed(&mut self.central, &peripheral, &channel, result);
        self.apply_progress(progress);
    }

    fn apply_progress(&mut self, progress: Progress) {
        let result = match progress {
            Progress::Waiting => return,
            Progress::Complete => Ok(()),
            Progress::Failed(e) => Err(e),
        };
        if let Some(print) = self.print.take() {
            match &result {
                Ok(()) => info!("print to {} complete", print.target),
                Err(e) => warn!("print to {} failed: {}", print.target, e),
            }
            answer(print.reply, result);
        }
    }

    /// Clear channel state and reject every waiter with `err`.
    fn fail_all(&mut self, err: PrinterError) {
        self.resolver = None;
        self.channel = None;
        if let Some(mut print) = self.print.take() {
            print.transmitter.clear();
            warn!("print to {} failed: {}", print.target, err);
            answer(print.reply, Err(err.clone()));
        }
        if let Some(connect) = self.connect.take() {
            warn!("connect to {} failed: {}", connect.target, err);
            answer(connect.reply, Err(err));
        }
    }
}
