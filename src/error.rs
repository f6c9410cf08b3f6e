//! Error types returned to callers of the print bridge.

use thiserror::Error;

/// Every way a print or connect request can end unsuccessfully.
///
/// Cloneable because a single adapter-level failure rejects both the in-flight
/// print and the in-flight connect request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrinterError {
    /// Adapter is off, unauthorized, unsupported or never powered on.
    #[error("Bluetooth is not available: {0}")]
    AdapterUnavailable(String),

    /// Known-device lookup and scanning ended without a match.
    #[error("Could not find printer: {0}")]
    DeviceNotFound(String),

    #[error("Failed to connect to printer: {0}")]
    ConnectionFailed(String),

    #[error("Error discovering services: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("No writable characteristic found on {0}")]
    NoWritableCharacteristic(String),

    #[error("Error writing data to printer: {0}")]
    WriteFailed(String),

    #[error("QR data is too large ({len} bytes, max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// A conflicting request is already in flight; carries what it is.
    #[error("{0}")]
    Busy(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend setup failures (no adapter, btleplug errors outside a request).
    #[error("Bluetooth error: {0}")]
    Ble(String),

    #[error("Printer bridge has shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, PrinterError>;

impl From<btleplug::Error> for PrinterError {
    fn from(e: btleplug::Error) -> Self {
        PrinterError::Ble(e.to_string())
    }
}
