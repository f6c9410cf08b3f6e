use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use escpos_ble::central::{CharProps, CharacteristicInfo};
use escpos_ble::{
    AdapterState, BleEvent, BridgeConfig, Central, DeviceId, PeripheralInfo, PermissionProvider,
    PermissionState, PrinterBridge, PrinterError, WriteMode,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use uuid::Uuid;

const ADDRESS: &str = "66:22:B4:01:02:03";
const NAME: &str = "MPT-II";

fn printer_info() -> PeripheralInfo {
    PeripheralInfo {
        id: ADDRESS.into(),
        name: Some(NAME.into()),
    }
}

fn service() -> Uuid {
    Uuid::from_u128(0x0000_18f0_0000_1000_8000_0080_5f9b_34fb)
}

/// A printer that answers every command through the event channel.
struct SimPrinter {
    events: mpsc::UnboundedSender<BleEvent>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Bonded, so the known-device lookup finds it without scanning.
    bonded: bool,
    ack_writes: bool,
    mtu: usize,
}

impl SimPrinter {
    fn send(&self, event: BleEvent) {
        let _ = self.events.send(event);
    }
}

impl Central for SimPrinter {
    fn lookup_known(&mut self, target: &DeviceId) {
        let found = Some(printer_info()).filter(|p| self.bonded && target.matches(p));
        self.send(BleEvent::KnownLookup {
            target: target.clone(),
            peripheral: found,
        });
    }

    fn start_scan(&mut self) {
        self.send(BleEvent::Discovered(PeripheralInfo {
            id: "11:11:11:11:11:11".into(),
            name: Some("Speaker".into()),
        }));
        self.send(BleEvent::Discovered(printer_info()));
    }

    fn stop_scan(&mut self) {}

    fn connect(&mut self, peripheral: &PeripheralInfo) {
        self.send(BleEvent::Connected {
            peripheral: peripheral.id.clone(),
        });
    }

    fn disconnect(&mut self, peripheral: &PeripheralInfo) {
        self.send(BleEvent::Disconnected {
            peripheral: peripheral.id.clone(),
            reason: None,
        });
    }

    fn discover_services(&mut self, peripheral: &PeripheralInfo) {
        self.send(BleEvent::ServicesDiscovered {
            peripheral: peripheral.id.clone(),
            result: Ok(vec![Uuid::from_u128(0x1800), service()]),
        });
    }

    fn discover_characteristics(&mut self, peripheral: &PeripheralInfo, service_uuid: Uuid) {
        let characteristics = if service_uuid == service() {
            vec![CharacteristicInfo {
                uuid: Uuid::from_u128(0x2af1),
                service: service_uuid,
                properties: CharProps {
                    write: true,
                    write_without_response: true,
                },
            }]
        } else {
            Vec::new()
        };
        self.send(BleEvent::CharacteristicsDiscovered {
            peripheral: peripheral.id.clone(),
            service: service_uuid,
            result: Ok(characteristics),
        });
    }

    fn write(
        &mut self,
        peripheral: &PeripheralInfo,
        _characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    ) {
        assert!(self.mtu == 0 || data.len() <= self.mtu);
        self.received.lock().unwrap().push(data.to_vec());
        if mode == WriteMode::WithResponse && self.ack_writes {
            self.send(BleEvent::WriteCompleted {
                peripheral: peripheral.id.clone(),
                result: Ok(()),
            });
        }
    }

    fn max_write_len(&self, _peripheral: &PeripheralInfo, _mode: WriteMode) -> usize {
        self.mtu
    }
}

struct Granted;

#[async_trait]
impl PermissionProvider for Granted {
    async fn check(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn request(&self) -> PermissionState {
        PermissionState::Granted
    }
}

struct Harness {
    bridge: PrinterBridge,
    events: mpsc::UnboundedSender<BleEvent>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Harness {
    fn bytes(&self) -> Vec<u8> {
        self.received.lock().unwrap().concat()
    }

    fn writes(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

fn start(bonded: bool, ack_writes: bool) -> Harness {
    let (events, events_rx) = mpsc::unbounded_channel();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sim = SimPrinter {
        events: events.clone(),
        received: received.clone(),
        bonded,
        ack_writes,
        mtu: 20,
    };
    events.send(BleEvent::AdapterState(AdapterState::On)).unwrap();
    let (bridge, _task) =
        PrinterBridge::spawn(sim, events_rx, &BridgeConfig::default(), Arc::new(Granted));
    Harness {
        bridge,
        events,
        received,
    }
}

#[tokio::test]
async fn print_text_to_bonded_printer() {
    let h = start(true, true);
    h.bridge.print(ADDRESS, "Hello\r\nWorld\n\n").await.unwrap();

    let mut expected = vec![0x1B, 0x40, 0x1B, 0x74, 28];
    expected.extend_from_slice(b"Hello\nWorld\n\n\n\n");
    assert_eq!(h.bytes(), expected);
    assert_eq!(h.bridge.is_connected(ADDRESS).await, Ok(true));
}

#[tokio::test]
async fn print_qr_code_after_scan_by_name() {
    let h = start(false, true);
    let url = "https://example.com/receipt/0001";
    h.bridge.print_qr_code(NAME, url).await.unwrap();

    let bytes = h.bytes();
    let store = [0x1D, 0x28, 0x6B, (url.len() + 3) as u8, 0x00, 0x31, 0x50, 0x30];
    let at = bytes
        .windows(store.len())
        .position(|w| w == store)
        .expect("store-data command");
    assert_eq!(&bytes[at + store.len()..at + store.len() + url.len()], url.as_bytes());
    assert!(bytes.ends_with(&[0x1B, 0x61, 0x00, 0x0A, 0x0A, 0x0A]));
    assert_eq!(h.bridge.is_connected(NAME).await, Ok(true));
}

#[tokio::test]
async fn oversized_qr_rejected_without_traffic() {
    let h = start(true, true);
    let result = h.bridge.print_qr_code(ADDRESS, &"x".repeat(801)).await;
    assert_eq!(result, Err(PrinterError::PayloadTooLarge { len: 801, max: 800 }));
    assert_eq!(h.writes(), 0);
    assert_eq!(h.bridge.is_connected(ADDRESS).await, Ok(false));
}

#[tokio::test]
async fn second_print_is_busy_and_disconnect_rejects_first() {
    let h = start(true, false);
    let first = tokio::spawn({
        let bridge = h.bridge.clone();
        async move { bridge.print(ADDRESS, "first").await }
    });

    // the first print is stuck on its first unacknowledged write
    while h.writes() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        h.bridge.print(ADDRESS, "second").await,
        Err(PrinterError::Busy("Another print operation is already in progress".into()))
    );
    assert!(matches!(h.bridge.disconnect(NAME).await, Err(PrinterError::Busy(_))));
    assert_eq!(h.writes(), 1);

    h.events
        .send(BleEvent::Disconnected {
            peripheral: ADDRESS.into(),
            reason: Some("printer powered off".into()),
        })
        .unwrap();
    assert_eq!(
        first.await.unwrap(),
        Err(PrinterError::Disconnected("printer powered off".into()))
    );
    assert_eq!(h.bridge.is_connected(ADDRESS).await, Ok(false));
}

#[tokio::test]
async fn connect_then_disconnect() {
    let h = start(true, true);
    h.bridge.connect(ADDRESS).await.unwrap();
    assert_eq!(h.bridge.is_connected(ADDRESS).await, Ok(true));
    assert_eq!(h.bridge.check_permissions().await, PermissionState::Granted);

    h.bridge.disconnect(ADDRESS).await.unwrap();
    assert_eq!(h.bridge.is_connected(ADDRESS).await, Ok(false));

    // reconnecting after our own disconnect works
    h.bridge.print(ADDRESS, "again").await.unwrap();
    assert!(h.bytes().ends_with(b"again\n\n\n\n"));
}
