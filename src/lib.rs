//! escpos-ble: print text and QR codes on ESC/POS thermal receipt printers over BLE.
//!
//! Main modules:
//! - bridge: async `PrinterBridge` handle and its event loop
//! - ble: btleplug backend, scanning
//! - coordinator: request state machine (connect, resolve, transmit)
//! - protocol: ESC/POS frames for text and QR jobs
//! - central: BLE commands and events the state machine works with
//!
//! ```no_run
//! # async fn demo() -> escpos_ble::Result<()> {
//! let config = escpos_ble::BridgeConfig::default();
//! let (printer, _task) = escpos_ble::ble::open(&config).await?;
//! printer.print("AA:BB:CC:DD:EE:FF", "Hello\nWorld").await?;
//! printer.print_qr_code("AA:BB:CC:DD:EE:FF", "https://example.com").await?;
//! # Ok(())
//! # }
//! ```

pub mod ble;
pub mod bridge;
pub mod central;
pub mod codepage;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod resolver;
pub mod transmitter;

/// BLE API: open a bridge on the system adapter, scan for printers
pub use ble::{BtleplugCentral, DeviceInfo, known_devices, open, scan};
pub use bridge::{PermissionProvider, PermissionState, PrinterBridge};
pub use central::{AdapterState, BleEvent, Central, DeviceId, PeripheralInfo, WriteMode};
pub use codepage::CodePage;
pub use config::BridgeConfig;
pub use error::{PrinterError, Result};
/// Protocol utilities (frames, QR settings, chunking)
pub use protocol::*;
